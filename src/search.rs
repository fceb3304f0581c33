//! Feed search ranking.

use std::cmp::Ordering;

use regex::Regex;

use crate::sheet::SheetRow;

/// Director matches count for a bit less than title matches.
const DIRECTOR_WEIGHT: f32 = 0.8;

/// A lowercased search query with its word-start pattern compiled once.
pub struct SearchQuery {
    query: String,
    word_start: Option<Regex>,
}

impl SearchQuery {
    pub fn new(query: &str) -> Self {
        let query = query.trim().to_lowercase();
        // ASCII word boundary, so accented letters count as separators
        let word_start = Regex::new(&format!(r"(?-u:\b){}", regex::escape(&query))).ok();
        Self { query, word_start }
    }

    /// Exact 100, prefix 80, start of a word 70, anywhere 50, else 0.
    pub fn score(&self, text: &str) -> u8 {
        let q = self.query.as_str();
        if text.is_empty() || q.is_empty() {
            return 0;
        }
        let t = text.to_lowercase();
        if t == q {
            100
        } else if t.starts_with(q) {
            80
        } else if self.word_start.as_ref().is_some_and(|re| re.is_match(&t)) {
            70
        } else if t.contains(q) {
            50
        } else {
            0
        }
    }
}

/// Scores how well `text` matches `query`. Case-insensitive; a blank query
/// scores 0.
pub fn score_search_text(text: &str, query: &str) -> u8 {
    SearchQuery::new(query).score(text)
}

/// Rows matching `query` by name or director, best first; ties go to the
/// more recent entry.
pub fn search_rows<'a>(rows: &'a [SheetRow], query: &str) -> Vec<&'a SheetRow> {
    let query = SearchQuery::new(query);
    let mut scored: Vec<(f32, &SheetRow)> = rows
        .iter()
        .map(|row| {
            let name = f32::from(query.score(&row.name));
            let director = f32::from(query.score(&row.director)) * DIRECTOR_WEIGHT;
            (name.max(director), row)
        })
        .filter(|(score, _)| *score > 0.0)
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.date.cmp(&a.date))
    });
    scored.into_iter().map(|(_, row)| row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_tiers() {
        assert_eq!(score_search_text("Alien", "alien"), 100);
        assert_eq!(score_search_text("Alien", "ali"), 80);
        assert_eq!(score_search_text("The Alien", "alien"), 70);
        assert_eq!(score_search_text("Solaris", "lar"), 50);
        assert_eq!(score_search_text("Solaris", ""), 0);
        assert_eq!(score_search_text("", "x"), 0);
        assert_eq!(score_search_text("Solaris", "xyz"), 0);
    }

    #[test]
    fn query_metacharacters_are_literal() {
        assert_eq!(score_search_text("Who? (1974)", "(1974"), 50);
        assert_eq!(score_search_text("8½", "8½"), 100);
    }

    #[test]
    fn accented_letters_separate_words() {
        assert_eq!(score_search_text("Amélie", "lie"), 70);
        assert_eq!(score_search_text("Solaris", "aris"), 50);
    }

    fn row(date: &str, name: &str, director: &str) -> SheetRow {
        SheetRow {
            date: date.into(),
            name: name.into(),
            director: director.into(),
            ..SheetRow::default()
        }
    }

    #[test]
    fn ranks_by_score_then_date() {
        let rows = vec![
            row("2024-01-01", "Alien", "Ridley Scott"),
            row("2024-03-01", "Aliens", "James Cameron"),
            row("2024-02-01", "Scott Pilgrim", "Edgar Wright"),
            row("2024-04-01", "Heat", "Michael Mann"),
            row("2024-05-01", "Alien Covenant", "Ridley Scott"),
        ];

        let names: Vec<&str> = search_rows(&rows, "ali")
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, ["Alien Covenant", "Aliens", "Alien"]);

        let names: Vec<&str> = search_rows(&rows, "scott")
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        // title prefix 80 beats director word-start 70 * 0.8
        assert_eq!(names, ["Scott Pilgrim", "Alien Covenant", "Alien"]);
    }
}
