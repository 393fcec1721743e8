//! Glob matching for cache keys and broker channels.
//!
//! The dialect is the subset of Redis glob syntax used by `KEYS` and
//! `PSUBSCRIBE` that this crate relies on: `*` matches any run of
//! characters (including none) and `?` matches exactly one character.

/// Checks whether `candidate` matches the glob `pattern`.
///
/// # Examples
///
/// ```
/// use cachesync_core::cache::pattern_matches;
///
/// assert!(pattern_matches("food-info::*", "food-info::42"));
/// assert!(pattern_matches("diet-record::*::2024-06-1?", "diet-record::7::2024-06-15"));
/// assert!(pattern_matches("cache:*", "cache:events"));
/// assert!(!pattern_matches("food-info::*", "user::1"));
/// ```
pub fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    // Position of the last `*` seen and the candidate index it resumes from.
    let mut star: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, c));
                p += 1;
            }
            Some(&ch) if ch == '?' || ch == candidate[c] => {
                p += 1;
                c += 1;
            }
            _ => match star {
                // Let the last `*` swallow one more character and retry.
                Some((star_p, star_c)) => {
                    star = Some((star_p, star_c + 1));
                    p = star_p + 1;
                    c = star_c + 1;
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}
