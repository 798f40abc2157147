//! Output truncation for error messages.
//!
//! `pg_dump -v` and `pg_restore -v` narrate every object they touch, so a
//! failed run on a large database can produce megabytes of text. Errors keep
//! the beginning (connection and setup messages) and the end (the actual
//! failure) and drop the middle.

/// Maximum characters of tool output carried inside an error.
pub const MAX_ERROR_OUTPUT_CHARS: usize = 16_000;

/// Keep the first and last `max_chars / 2` characters of `output` and replace
/// the middle with a marker naming how many characters were dropped.
///
/// Cuts land on `char` boundaries.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let keep = max_chars / 2;
    let omitted = total - 2 * keep;
    let head_end = output.char_indices().nth(keep).map_or(output.len(), |(i, _)| i);
    let tail_start = output
        .char_indices()
        .nth(total - keep)
        .map_or(output.len(), |(i, _)| i);

    format!(
        "{}\n\n... [{omitted} chars of tool output omitted] ...\n\n{}",
        &output[..head_end],
        &output[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_untouched() {
        assert_eq!(truncate_output("pg_dump: done", 100), "pg_dump: done");
    }

    #[test]
    fn long_output_keeps_both_ends() {
        let input = format!("{}{}{}", "A".repeat(50), "B".repeat(200), "C".repeat(50));
        let out = truncate_output(&input, 100);
        assert!(out.starts_with('A'));
        assert!(out.ends_with('C'));
        assert!(out.contains("200 chars of tool output omitted"));
    }

    #[test]
    fn odd_limit_reports_every_dropped_char() {
        let input = "x".repeat(299);
        let out = truncate_output(&input, 101);
        assert!(out.contains("[199 chars of tool output omitted]"));
        assert_eq!(out.chars().filter(|c| *c == 'x').count(), 100);
    }

    #[test]
    fn multibyte_tail_is_cut_on_a_boundary() {
        let input = format!("{}{}", "a".repeat(20), "é".repeat(20));
        let out = truncate_output(&input, 10);
        assert!(out.starts_with("aaaaa\n"));
        assert!(out.ends_with("ééééé"));
        assert!(out.contains("[30 chars"));
    }

    #[test]
    fn multibyte_chars_counted_not_bytes() {
        // 60 chars but 120+ bytes: fits by char count.
        let s = "é".repeat(60);
        assert_eq!(truncate_output(&s, 100), s);
    }
}
