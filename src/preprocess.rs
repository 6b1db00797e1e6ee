//! Line-level cleanup applied before lexing.

/// Drop blank lines and whole-line `--` comments, and cut each remaining
/// line at its first `" -- "`.
///
/// Works on raw lines, so a `" -- "` inside a string literal is cut too.
pub fn strip_comments(input: &str) -> String {
    input
        .lines()
        .filter(|line| {
            let t = line.trim();
            !t.is_empty() && !t.starts_with("--")
        })
        .map(|line| match line.find(" -- ") {
            Some(i) => &line[..i],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
