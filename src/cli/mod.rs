//! Operator commands: search the store, print collection stats, check the
//! database.

pub mod doctor;
pub mod search;
pub mod stats;

/// First `max_chars` characters of `text` on one line.
fn preview(text: &str, max_chars: usize) -> String {
    let line = text.replace('\n', " | ");
    if line.chars().count() > max_chars {
        format!("{}...", crate::document::mapper::truncate(&line, max_chars))
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_cuts() {
        assert_eq!(preview("a\nb", 10), "a | b");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
