//! Prompt composition from a notes snapshot.
//!
//! Each note renders as one `- {key}: {text}` line in store order.  An
//! optional character bound truncates greedily: whole lines are kept while
//! the sum of their lengths (separators not counted) stays within the bound,
//! and everything from the first overflowing line onward is dropped.

use super::store::Notes;

const PROMPT_TEMPLATE: &str = "You are a personal assistant. \
Use only these notes to answer the question. \
If the information is not there, honestly say you don't know.\n\n\
Context: {{context}}\n\n\
Question: {{question}}\n\
Answer concisely.";

/// Render `notes` as context lines, bounded by `max_chars` when given.
///
/// Lengths are counted in `char`s.
pub fn context_lines(notes: &Notes, max_chars: Option<usize>) -> Vec<String> {
    let lines = notes.iter().map(|(k, v)| format!("- {k}: {v}"));
    let Some(limit) = max_chars else {
        return lines.collect();
    };

    let mut kept = Vec::new();
    let mut used = 0usize;
    for line in lines {
        let len = line.chars().count();
        if used + len > limit {
            break;
        }
        used += len;
        kept.push(line);
    }
    kept
}

/// Newline-joined context block.
pub fn render_context(notes: &Notes, max_chars: Option<usize>) -> String {
    context_lines(notes, max_chars).join("\n")
}

/// Full model prompt for `question`.
pub fn compose(question: &str, notes: &Notes, max_chars: Option<usize>) -> String {
    let context = render_context(notes, max_chars);
    // Single pass so a `{{question}}` inside a note is not substituted.
    PROMPT_TEMPLATE
        .split_once("{{context}}")
        .map(|(head, tail)| {
            let tail = tail.replacen("{{question}}", question, 1);
            format!("{head}{context}{tail}")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes(pairs: &[(&str, &str)]) -> Notes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_lines_in_store_order() {
        let n = notes(&[("plans", "gym"), ("ideas", "blog post")]);
        assert_eq!(render_context(&n, None), "- plans: gym\n- ideas: blog post");
    }

    #[test]
    fn prompt_embeds_context_and_question() {
        let n = notes(&[("shopping", "milk, bread")]);
        let prompt = compose("what to buy?", &n, None);
        assert!(prompt.starts_with("You are a personal assistant."));
        assert!(prompt.contains("Context: - shopping: milk, bread\n\n"));
        assert!(prompt.contains("Question: what to buy?\n"));
        assert!(prompt.ends_with("Answer concisely."));
        assert!(prompt.contains("don't know"));
    }

    #[test]
    fn compose_is_deterministic() {
        let n = notes(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(compose("q", &n, Some(10)), compose("q", &n, Some(10)));
        assert_eq!(compose("q", &n, None), compose("q", &n, None));
    }

    #[test]
    fn bound_counts_line_lengths_only() {
        // Each line is "- k: v" = 6 chars.
        let n = notes(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(context_lines(&n, Some(12)).len(), 2);
        assert_eq!(context_lines(&n, Some(11)).len(), 1);
        assert_eq!(context_lines(&n, Some(18)).len(), 3);
    }

    #[test]
    fn later_short_line_not_considered_after_overflow() {
        let n = notes(&[("a", "1"), ("long", "xxxxxxxxxxxxxxxxxxxx"), ("b", "2")]);
        let lines = context_lines(&n, Some(14));
        assert_eq!(lines, vec!["- a: 1".to_string()]);
    }

    #[test]
    fn bounded_context_is_prefix_within_limit() {
        let n = notes(&[
            ("one", "alpha"),
            ("two", "beta beta"),
            ("three", "gamma gamma gamma"),
            ("four", "d"),
        ]);
        let full = context_lines(&n, None);
        for limit in 0..80 {
            let bounded = context_lines(&n, Some(limit));
            let total: usize = bounded.iter().map(|l| l.chars().count()).sum();
            assert!(total <= limit, "limit {limit} exceeded: {total}");
            assert_eq!(bounded[..], full[..bounded.len()]);
        }
    }

    #[test]
    fn zero_bound_yields_empty_context() {
        let n = notes(&[("a", "1")]);
        assert_eq!(render_context(&n, Some(0)), "");
        assert!(compose("q", &n, Some(0)).contains("Context: \n\n"));
    }

    #[test]
    fn question_placeholder_in_note_is_left_alone() {
        let n = notes(&[("tpl", "{{question}}")]);
        let prompt = compose("real?", &n, None);
        assert!(prompt.contains("- tpl: {{question}}"));
        assert!(prompt.contains("Question: real?"));
    }
}
