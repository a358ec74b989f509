//! Text rendering utilities for human-friendly error messages.
//!
//! Provides helpers to format bean reference chains, type names,
//! and "did you mean?" suggestions in error output.

/// Renders a reference chain as a readable string.
///
/// # Examples
/// ```
/// use trellis_support::rendering::render_chain;
///
/// let chain = vec!["userService", "userRepository", "dataSource", "userService"];
/// let rendered = render_chain(&chain);
/// assert_eq!(rendered, "userService → userRepository → dataSource → userService");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Renders a list of names as `'a', 'b', 'c'`.
///
/// ```
/// use trellis_support::rendering::render_names;
///
/// assert_eq!(render_names(&["primaryDb", "replicaDb"]), "'primaryDb', 'replicaDb'");
/// let none: [&str; 0] = [];
/// assert_eq!(render_names(&none), "");
/// ```
pub fn render_names(names: &[impl AsRef<str>]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drops module paths from a type name, keeping generics readable.
///
/// ```
/// use trellis_support::rendering::shorten_type_name;
///
/// assert_eq!(shorten_type_name("my_app::pool::ConnectionPool"), "ConnectionPool");
/// assert_eq!(
///     shorten_type_name("alloc::sync::Arc<dyn my_app::log::Logger>"),
///     "Arc<dyn Logger>"
/// );
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut short = String::with_capacity(full_name.len());
    let mut segment_start = 0;

    for (index, ch) in full_name.char_indices() {
        if matches!(ch, '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&') {
            short.push_str(last_path_segment(&full_name[segment_start..index]));
            short.push(ch);
            segment_start = index + ch.len_utf8();
        }
    }
    short.push_str(last_path_segment(&full_name[segment_start..]));
    short
}

fn last_path_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Picks registered names close to a misspelled `requested` name.
///
/// A name containing (or contained in) the request ranks first, ignoring
/// case. Otherwise names within an edit distance of a third of the
/// request's length qualify, closest first. At most `max_suggestions`
/// names are returned; ties keep the order of `available`.
///
/// ```
/// use trellis_support::rendering::suggest_similar;
///
/// let names = ["dataSource", "userRepository", "userService"];
/// assert_eq!(suggest_similar("userServise", &names, 3), vec!["userService"]);
/// assert_eq!(suggest_similar("source", &names, 3), vec!["dataSource"]);
/// ```
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let wanted = requested.to_lowercase();
    let budget = (wanted.chars().count() / 3).max(1);

    let mut ranked: Vec<(usize, &str)> = available
        .iter()
        .copied()
        .filter(|name| *name != requested)
        .filter_map(|name| {
            let candidate = name.to_lowercase();
            if candidate.contains(&wanted) || wanted.contains(&candidate) {
                return Some((0, name));
            }
            let distance = edit_distance(&candidate, &wanted);
            (distance <= budget).then_some((distance, name))
        })
        .collect();

    ranked.sort_by_key(|(rank, _)| *rank);
    ranked
        .into_iter()
        .take(max_suggestions)
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_simple_chain() {
        let chain = vec!["a", "b", "c", "a"];
        assert_eq!(render_chain(&chain), "a → b → c → a");
    }

    #[test]
    fn render_single_element_chain() {
        assert_eq!(render_chain(&["a"]), "a");
    }

    #[test]
    fn render_empty_chain() {
        let chain: Vec<&str> = vec![];
        assert_eq!(render_chain(&chain), "");
    }

    #[test]
    fn render_owned_names() {
        let names = vec![String::from("x"), String::from("y")];
        assert_eq!(render_names(&names), "'x', 'y'");
    }

    #[test]
    fn shorten_keeps_generic_structure() {
        assert_eq!(shorten_type_name("String"), "String");
        assert_eq!(
            shorten_type_name("core::option::Option<alloc::vec::Vec<app::Pool>>"),
            "Option<Vec<Pool>>"
        );
        assert_eq!(
            shorten_type_name("std::collections::HashMap<alloc::string::String, app::Bean>"),
            "HashMap<String, Bean>"
        );
        assert_eq!(shorten_type_name("&[app::Pool; 2]"), "&[Pool; 2]");
    }

    #[test]
    fn edit_distance_counts_single_edits() {
        assert_eq!(edit_distance("pool", "pool"), 0);
        assert_eq!(edit_distance("pool", "poll"), 1);
        assert_eq!(edit_distance("pool", "spool"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
    }

    #[test]
    fn suggestions_prefer_substring_matches() {
        let available = ["poll", "pools", "clock"];
        assert_eq!(suggest_similar("pool", &available, 3), vec!["pools", "poll"]);
        assert_eq!(suggest_similar("pool", &available, 1), vec!["pools"]);
    }

    #[test]
    fn suggestions_skip_the_exact_name() {
        assert!(suggest_similar("logger", &["logger"], 3).is_empty());
    }

    #[test]
    fn unrelated_names_are_not_suggested() {
        assert!(suggest_similar("xyzAbcDef", &["dataSource"], 3).is_empty());
    }
}
