//! Remote path joining utilities.
//!
//! Remote base paths come from workspace configuration as plain strings and
//! must never be joined through `PathBuf` (the local platform separator is
//! irrelevant to the remote side). Join with `/` and collapse duplicate
//! separators at the seam instead.

/// Join a remote base path with relative segments using `/`.
pub fn join_remote(base: &str, segments: &[&str]) -> String {
    let mut out = base.trim_end_matches('/').to_string();
    for segment in segments {
        let trimmed = segment.trim_start_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(trimmed);
    }
    out
}
