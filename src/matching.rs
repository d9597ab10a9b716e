//! Stateless predicate evaluation over (article, criterion) pairs.
//!
//! Keyword values are a tiny expression language:
//!
//! - `!term` — exclusion: the title must not match `term`
//! - `a&b` — conjunction of substrings
//! - `regexp:<pattern>` — regular expression over the title
//! - anything else — case-insensitive substring
//!
//! Values are parsed into [`KeywordExpr`] once; invalid patterns surface as
//! Validation errors at subscription-write time rather than in the pollers.

use regex::Regex;

use crate::cache::PushThresholds;
use crate::db::articles::Article;
use crate::errors::Error;

#[derive(Debug, Clone)]
pub enum KeywordExpr {
    Substring(String),
    And(Vec<String>),
    Regex(Regex),
    Exclude(Box<KeywordExpr>),
}

pub fn parse_keyword(value: &str) -> Result<KeywordExpr, Error> {
    if let Some(rest) = value.strip_prefix('!') {
        if rest.is_empty() {
            return Err(Error::Validation("empty exclusion keyword".into()));
        }
        return Ok(KeywordExpr::Exclude(Box::new(parse_keyword(rest)?)));
    }
    if let Some(pattern) = value.strip_prefix("regexp:") {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Validation(format!("invalid pattern {pattern:?}: {e}")))?;
        return Ok(KeywordExpr::Regex(regex));
    }
    if value.contains('&') {
        let terms: Vec<String> = value
            .split('&')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Err(Error::Validation("empty keyword".into()));
        }
        return Ok(KeywordExpr::And(terms));
    }
    let term = value.trim();
    if term.is_empty() {
        return Err(Error::Validation("empty keyword".into()));
    }
    Ok(KeywordExpr::Substring(term.to_lowercase()))
}

impl KeywordExpr {
    pub fn is_exclusion(&self) -> bool {
        matches!(self, KeywordExpr::Exclude(_))
    }

    /// Whether the title satisfies the expression. For `Exclude` this is the
    /// inner match, i.e. "the title mentions the excluded term".
    pub fn matches(&self, title: &str) -> bool {
        match self {
            KeywordExpr::Substring(term) => title.to_lowercase().contains(term),
            KeywordExpr::And(terms) => {
                let lowered = title.to_lowercase();
                terms.iter().all(|t| lowered.contains(t))
            }
            KeywordExpr::Regex(regex) => regex.is_match(title),
            KeywordExpr::Exclude(inner) => inner.matches(title),
        }
    }
}

/// A subscriber's keyword set matches when at least one non-exclusion keyword
/// matches and no exclusion keyword does. Values that fail to parse are
/// skipped; they were rejected at write time, so this only happens for rows
/// predating validation.
pub fn title_matches_keywords(title: &str, values: &[String]) -> bool {
    let mut hit = false;
    for value in values {
        let expr = match parse_keyword(value) {
            Ok(expr) => expr,
            Err(e) => {
                tracing::debug!(%value, "unparseable keyword skipped: {e}");
                continue;
            }
        };
        match expr {
            KeywordExpr::Exclude(inner) => {
                if inner.matches(title) {
                    return false;
                }
            }
            expr => {
                if expr.matches(title) {
                    hit = true;
                }
            }
        }
    }
    hit
}

pub fn author_matches(article_author: &str, subscribed: &str) -> bool {
    !subscribed.is_empty() && article_author.eq_ignore_ascii_case(subscribed)
}

/// Whether the current push sum satisfies either threshold. The one-shot
/// suppression lives with the poller; this is the bare predicate.
pub fn pushsum_reaches(push_sum: i32, thresholds: PushThresholds) -> bool {
    (thresholds.up > 0 && push_sum >= thresholds.up)
        || (thresholds.down < 0 && push_sum <= thresholds.down)
}

#[derive(Debug, Clone)]
pub enum Criterion<'a> {
    Keyword(&'a [String]),
    Author(&'a str),
    PushSum(PushThresholds),
    Article(&'a str),
}

pub fn matches(article: &Article, criterion: &Criterion<'_>) -> bool {
    match criterion {
        Criterion::Keyword(values) => title_matches_keywords(&article.title, values),
        Criterion::Author(author) => author_matches(&article.author, author),
        Criterion::PushSum(thresholds) => pushsum_reaches(article.push_sum, *thresholds),
        Criterion::Article(code) => article.code == **code,
    }
}

/// Splits a keyword value into the components counted by subscription stats:
/// exclusions count nothing, `regexp:` alternations and `&` conjunctions
/// count each part once.
pub fn stat_values(value: &str) -> Vec<String> {
    if value.starts_with('!') {
        return Vec::new();
    }
    if let Some(pattern) = value.strip_prefix("regexp:") {
        return pattern
            .split('|')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    if value.contains('&') {
        return value
            .split('&')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    vec![value.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str) -> Article {
        Article {
            title: title.to_string(),
            ..Article::default()
        }
    }

    #[test]
    fn substring_is_case_insensitive() {
        let values = vec!["問卦".to_string()];
        assert!(title_matches_keywords("[問卦] 有沒有八卦", &values));
        assert!(!title_matches_keywords("[新聞] 無關", &values));

        let values = vec!["gta".to_string()];
        assert!(title_matches_keywords("[情報] GTA VI 上市", &values));
    }

    #[test]
    fn and_requires_every_term() {
        let values = vec!["台積&股價".to_string()];
        assert!(title_matches_keywords("台積電股價創新高", &values));
        assert!(!title_matches_keywords("台積電", &values));
    }

    #[test]
    fn exclusion_vetoes_other_matches() {
        let values = vec!["股價".to_string(), "!廣告".to_string()];
        assert!(title_matches_keywords("股價上揚", &values));
        assert!(!title_matches_keywords("股價廣告優惠", &values));
        // exclusion alone never produces a match
        assert!(!title_matches_keywords("平凡標題", &["!廣告".to_string()]));
    }

    #[test]
    fn regex_keywords() {
        let values = vec!["regexp:^\\[(問卦|爆卦)\\]".to_string()];
        assert!(title_matches_keywords("[問卦] 請問", &values));
        assert!(title_matches_keywords("[爆卦] 大事", &values));
        assert!(!title_matches_keywords("[新聞] 無關", &values));
    }

    #[test]
    fn invalid_regex_is_a_validation_error() {
        assert!(matches!(
            parse_keyword("regexp:["),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn author_match_is_exact_and_case_insensitive() {
        assert!(author_matches("Alice", "alice"));
        assert!(!author_matches("Alice", "ali"));
        assert!(!author_matches("Alice", ""));
    }

    #[test]
    fn pushsum_thresholds() {
        let up = PushThresholds { up: 50, down: 0 };
        assert!(!pushsum_reaches(49, up));
        assert!(pushsum_reaches(51, up));
        let down = PushThresholds { up: 0, down: -20 };
        assert!(pushsum_reaches(-25, down));
        assert!(!pushsum_reaches(-10, down));
        assert!(!pushsum_reaches(100, PushThresholds::default()));
    }

    #[test]
    fn criterion_dispatch() {
        let a = article("[問卦] 測試");
        assert!(matches(&a, &Criterion::Keyword(&["問卦".to_string()])));
        let mut a = article("x");
        a.code = "M.1.A.2".into();
        assert!(matches(&a, &Criterion::Article("M.1.A.2")));
        assert!(!matches(&a, &Criterion::Article("M.9.A.9")));
    }

    #[test]
    fn match_result_is_order_independent() {
        let values_a = vec!["股價".to_string(), "!廣告".to_string()];
        let values_b = vec!["!廣告".to_string(), "股價".to_string()];
        for title in ["股價上揚", "股價廣告優惠", "其他"] {
            assert_eq!(
                title_matches_keywords(title, &values_a),
                title_matches_keywords(title, &values_b),
            );
        }
    }

    #[test]
    fn stat_value_splitting() {
        assert_eq!(stat_values("問卦"), vec!["問卦"]);
        assert_eq!(stat_values("台積&股價"), vec!["台積", "股價"]);
        assert_eq!(stat_values("regexp:A|B|C"), vec!["A", "B", "C"]);
        assert!(stat_values("!廣告").is_empty());
        assert_eq!(stat_values("regexp:A| |B"), vec!["A", "B"]);
    }
}
