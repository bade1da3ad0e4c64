// SPDX-License-Identifier: MPL-2.0

/// Matches `text` against a pattern in which `*` stands for any run of
/// characters, including the empty one. Every other character is literal.
///
/// ```
/// use version_order::glob_match;
///
/// assert!(glob_match("py3*_0", "py39h1234_0"));
/// assert!(glob_match("*", ""));
/// assert!(!glob_match("py3*", "np1py37"));
/// ```
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let (p, t) = (pattern.as_bytes(), text.as_bytes());
    let (mut pi, mut ti) = (0, 0);
    // Position after the last `*` seen, and the text position it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            pi += 1;
            backtrack = Some((pi, ti));
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            pi = star_p;
            ti = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&b| b == b'*')
}

// TESTS #######################################################################
