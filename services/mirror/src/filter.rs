//! Include and exclude lists of shell-style tag patterns.

use regex::Regex;

/// Selects which upstream tags are synchronized.
///
/// Patterns use `*` for any run of characters and `?` for a single
/// character, and must match the whole tag. With no include patterns every
/// tag is included. A tag matching any exclude pattern is never synchronized.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl TagFilter {
    /// Compile include and exclude patterns.
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self, regex::Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(TagFilter {
            include: include
                .into_iter()
                .map(|pattern| wildcard(pattern.as_ref()))
                .collect::<Result<_, _>>()?,
            exclude: exclude
                .into_iter()
                .map(|pattern| wildcard(pattern.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Whether `tag` should be synchronized.
    pub fn matches(&self, tag: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|re| re.is_match(tag));
        included && !self.exclude.iter().any(|re| re.is_match(tag))
    }
}

fn wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expression = String::with_capacity(pattern.len() + 2);
    expression.push('^');
    let mut buffer = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            c => expression.push_str(&regex::escape(c.encode_utf8(&mut buffer))),
        }
    }
    expression.push('$');
    Regex::new(&expression)
}
