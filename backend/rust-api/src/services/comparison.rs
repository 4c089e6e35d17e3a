use std::collections::HashSet;

use crate::models::article::{Article, ArticleComparison};

pub const HIGH_SIMILARITY: u32 = 70;
pub const MODERATE_SIMILARITY: u32 = 40;

struct Overlap {
    shared: Vec<String>,
    only_first: Vec<String>,
    only_second: Vec<String>,
    union_size: usize,
}

fn overlap(first: &[String], second: &[String]) -> Overlap {
    let shared = first.iter().filter(|t| second.contains(t)).cloned().collect();
    let only_first = first.iter().filter(|t| !second.contains(t)).cloned().collect();
    let only_second = second.iter().filter(|t| !first.contains(t)).cloned().collect();
    let union_size = first.iter().chain(second.iter()).collect::<HashSet<_>>().len();

    Overlap {
        shared,
        only_first,
        only_second,
        union_size,
    }
}

fn percentage(shared: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        shared as f64 / total as f64 * 100.0
    }
}

pub fn similarity_label(score: u32) -> &'static str {
    if score >= HIGH_SIMILARITY {
        "High Similarity"
    } else if score >= MODERATE_SIMILARITY {
        "Moderate Similarity"
    } else {
        "Low Similarity"
    }
}

/// Topic and keyword overlap, matched on exact strings.
pub fn compare_articles(first: &Article, second: &Article) -> ArticleComparison {
    let topics = overlap(&first.main_topics, &second.main_topics);
    let keywords = overlap(&first.keywords, &second.keywords);

    let topic_score = percentage(topics.shared.len(), topics.union_size);
    let keyword_score = percentage(keywords.shared.len(), keywords.union_size);
    let similarity_score = ((topic_score + keyword_score) / 2.0).round() as u32;

    ArticleComparison {
        similarity_score,
        similarity_label: similarity_label(similarity_score),
        shared_topics: topics.shared,
        unique_topics1: topics.only_first,
        unique_topics2: topics.only_second,
        shared_keywords: keywords.shared,
        unique_keywords1: keywords.only_first,
        unique_keywords2: keywords.only_second,
    }
}
