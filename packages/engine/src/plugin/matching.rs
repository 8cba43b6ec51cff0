use globset::GlobBuilder;

/// Ordering key for competing glob patterns: any concrete pattern beats a
/// catch-all, and among concrete patterns more literal text wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct GlobRank {
    concrete: bool,
    literal_weight: i32,
}

impl GlobRank {
    fn of(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if is_catch_all(pattern) {
            return Self {
                concrete: false,
                literal_weight: i32::MIN,
            };
        }
        let mut literal_weight = 0i32;
        for ch in pattern.chars() {
            match ch {
                '*' | '?' | '[' | ']' | '{' | '}' => literal_weight -= 1,
                _ => literal_weight += 1,
            }
        }
        Self {
            concrete: true,
            literal_weight,
        }
    }
}

/// Picks the candidate whose glob matches `path` with the highest rank.
/// Earlier candidates win ties, so installation order is the final
/// tie-break.
pub(crate) fn select_best_glob_match<'a, T>(
    path: &str,
    candidates: &'a [T],
    glob_of: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    let mut winner: Option<(&T, GlobRank)> = None;
    for candidate in candidates {
        let pattern = glob_of(candidate);
        if !glob_matches_path(pattern, path) {
            continue;
        }
        let rank = GlobRank::of(pattern);
        let beats_current = winner
            .as_ref()
            .map(|(_, current)| rank > *current)
            .unwrap_or(true);
        if beats_current {
            winner = Some((candidate, rank));
        }
    }
    winner.map(|(candidate, _)| candidate)
}

pub(crate) fn glob_matches_path(pattern: &str, path: &str) -> bool {
    let pattern = pattern.trim();
    let path = path.trim();
    if pattern.is_empty() || path.is_empty() {
        return false;
    }
    if is_catch_all(pattern) {
        return true;
    }
    match compile(pattern) {
        Some(matcher) => matcher.is_match(path),
        None => false,
    }
}

fn compile(pattern: &str) -> Option<globset::GlobMatcher> {
    // `*` crosses path separators and matching ignores case, so `*.JSON`
    // under any directory still routes to the json plugin.
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .case_insensitive(true)
        .build()
        .ok()
        .map(|glob| glob.compile_matcher())
}

fn is_catch_all(pattern: &str) -> bool {
    matches!(pattern, "*" | "**" | "**/*")
}
