/// Replaces `CRLF` with `LF`. Applied to all user-submitted code before it is
/// written into a workspace, so that containers see consistent line endings
/// regardless of the client's OS.
pub fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n")
}
