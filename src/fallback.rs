//! Heurísticas locales deterministas del servicio de IA.
//!
//! Se usan cuando no hay credencial configurada o cuando el endpoint remoto
//! falla. No dependen de red y siempre devuelven un resultado.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::models::{truncate_chars, LiteratureDraft, MindMapDraft, MindMapDraftNode};

pub const SUMMARY_MAX_CHARS: usize = 100;
pub const MAX_TAGS: usize = 5;
const BRANCH_MAX_CHARS: usize = 20;

const SENTENCE_DELIMITERS: [char; 6] = ['。', '！', '？', '.', '!', '?'];

const STOP_WORDS: [&str; 22] = [
    "的", "是", "在", "有", "和", "了", "我", "你", "the", "a", "an", "and", "or", "but", "in",
    "on", "at", "to", "for", "of", "with", "by",
];

fn word_regex() -> &'static Regex {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    WORD_RE.get_or_init(|| {
        Regex::new(r"[\x{4e00}-\x{9fa5}a-zA-Z]+").expect("regex de palabras válida")
    })
}

fn stop_words() -> &'static HashSet<&'static str> {
    static STOP: OnceLock<HashSet<&'static str>> = OnceLock::new();
    STOP.get_or_init(|| STOP_WORDS.into_iter().collect())
}

/// Primera frase (cortando por `。！？.!?`) truncada a 100 caracteres.
pub fn first_sentence_summary(content: &str) -> String {
    let first = content.split(SENTENCE_DELIMITERS).next().unwrap_or_default();
    truncate_chars(first, SUMMARY_MAX_CHARS)
}

/// Las 5 palabras más frecuentes (en minúsculas, más de un carácter, sin
/// palabras vacías). Los empates se resuelven por orden de primera aparición.
pub fn extract_tags(content: &str) -> Vec<String> {
    let lowered = content.to_lowercase();
    let stop = stop_words();

    let mut order: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for m in word_regex().find_iter(&lowered) {
        let word = m.as_str();
        if word.chars().count() <= 1 || stop.contains(word) {
            continue;
        }
        match index.get(word) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(word.to_string(), order.len());
                order.push((word.to_string(), 1));
            }
        }
    }

    // sort_by es estable: conserva el orden de primera aparición en empates
    order.sort_by(|a, b| b.1.cmp(&a.1));
    order.into_iter().take(MAX_TAGS).map(|(word, _)| word).collect()
}

fn sentences(content: &str) -> impl Iterator<Item = &str> {
    content
        .split(SENTENCE_DELIMITERS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Mapa mental de plantilla: el tema central es la palabra clave principal y
/// las ramas son las tres primeras frases.
pub fn template_mind_map(content: &str) -> MindMapDraft {
    let keywords = extract_tags(content);
    let center = keywords
        .first()
        .cloned()
        .unwrap_or_else(|| "Tema central".to_string());

    let branches = sentences(content)
        .take(3)
        .map(|sentence| {
            let mut name = truncate_chars(sentence, BRANCH_MAX_CHARS);
            if sentence.chars().count() > BRANCH_MAX_CHARS {
                name.push_str("...");
            }
            MindMapDraftNode {
                name,
                children: Some(Vec::new()),
            }
        })
        .collect();

    MindMapDraft {
        title: Some("Mapa mental del contenido".to_string()),
        root: MindMapDraftNode {
            name: center,
            children: Some(branches),
        },
    }
}

fn keyword_or<'a>(keywords: &'a [String], index: usize, default: &'a str) -> &'a str {
    keywords.get(index).map(String::as_str).unwrap_or(default)
}

fn keyword_slice(keywords: &[String], from: usize, to: usize) -> Vec<String> {
    keywords
        .iter()
        .skip(from)
        .take(to.saturating_sub(from))
        .cloned()
        .collect()
}

/// Tres referencias de plantilla sembradas con las palabras clave del texto.
pub fn template_literature(content: &str) -> Vec<LiteratureDraft> {
    let keywords = extract_tags(content);

    vec![
        LiteratureDraft {
            title: format!(
                "Revisión de la investigación sobre {}",
                keyword_or(&keywords, 0, "el tema")
            ),
            authors: vec!["Laura García".into(), "Miguel Torres".into()],
            abstract_text:
                "Revisión sistemática del estado del arte y de las líneas futuras de investigación en el área."
                    .into(),
            publication_date: Some("2023-06-15".into()),
            source: "Revista de Ciencias de la Computación".into(),
            url: Some("https://example.com/paper1".into()),
            tags: keyword_slice(&keywords, 0, 3),
            relevance_score: Some(0.92),
        },
        LiteratureDraft {
            title: format!(
                "Avances recientes en {}",
                keyword_or(&keywords, 1, "tecnologías clave")
            ),
            authors: vec!["Ana Romero".into(), "Jorge Ruiz".into()],
            abstract_text:
                "Presenta los resultados más recientes de la técnica y varios casos de aplicación."
                    .into(),
            publication_date: Some("2023-03-20".into()),
            source: "Investigación en Inteligencia Artificial".into(),
            url: None,
            tags: keyword_slice(&keywords, 1, 4),
            relevance_score: Some(0.85),
        },
        LiteratureDraft {
            title: format!(
                "Estudio aplicado basado en {}",
                keyword_or(&keywords, 2, "métodos modernos")
            ),
            authors: vec!["Sofía Navarro".into(), "Pablo Díaz".into()],
            abstract_text:
                "Analiza la eficacia del método en escenarios reales y propone optimizaciones."
                    .into(),
            publication_date: Some("2023-09-10".into()),
            source: "Ingeniería del Software".into(),
            url: None,
            tags: keyword_slice(&keywords, 2, 5),
            relevance_score: Some(0.78),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_rank_by_frequency_and_skip_stop_words() {
        let tags = extract_tags("the quick quick fox fox fox");
        assert_eq!(tags, vec!["fox", "quick"]);
    }

    #[test]
    fn tags_break_ties_by_first_occurrence() {
        let tags = extract_tags("beta alpha gamma alpha beta gamma delta");
        assert_eq!(tags, vec!["beta", "alpha", "gamma", "delta"]);
    }

    #[test]
    fn tags_are_capped_and_lowercased() {
        let tags = extract_tags("Uno dos tres cuatro cinco seis siete UNO");
        assert_eq!(tags.len(), MAX_TAGS);
        assert_eq!(tags[0], "uno");
    }

    #[test]
    fn tags_handle_cjk_runs_and_single_letters() {
        let tags = extract_tags("x 机器学习 y 机器学习 的 rust");
        assert_eq!(tags, vec!["机器学习", "rust"]);
    }

    #[test]
    fn summary_is_first_sentence() {
        assert_eq!(first_sentence_summary("Hola mundo. Segunda frase."), "Hola mundo");
        assert_eq!(first_sentence_summary("第一句。第二句"), "第一句");
        assert_eq!(first_sentence_summary(""), "");
    }

    #[test]
    fn summary_truncates_to_100_chars() {
        let long = "a".repeat(250);
        assert_eq!(first_sentence_summary(&long).chars().count(), SUMMARY_MAX_CHARS);

        let cjk = "字".repeat(150);
        assert_eq!(first_sentence_summary(&cjk), "字".repeat(100));
    }

    #[test]
    fn template_mind_map_uses_keyword_and_sentences() {
        let map = template_mind_map(
            "Rust ownership rules. Borrowing is checked at compile time! Lifetimes? Extra sentence.",
        );
        assert_eq!(map.root.name, "rust");
        let branches = map.root.children.unwrap();
        assert_eq!(branches.len(), 3);
        assert_eq!(branches[0].name, "Rust ownership rules");
        assert_eq!(branches[1].name, "Borrowing is checked...");
    }

    #[test]
    fn template_literature_is_seeded_from_keywords() {
        let lit = template_literature("grafos grafos grafos redes redes tokio");
        assert_eq!(lit.len(), 3);
        assert!(lit[0].title.contains("grafos"));
        assert!(lit[1].title.contains("redes"));
        assert!(lit[2].title.contains("tokio"));
        assert_eq!(lit[0].tags, vec!["grafos", "redes", "tokio"]);
    }

    #[test]
    fn template_literature_without_keywords_uses_defaults() {
        let lit = template_literature("");
        assert!(lit[0].title.contains("el tema"));
        assert!(lit.iter().all(|l| l.tags.is_empty()));
    }
}
