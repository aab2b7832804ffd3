//! Forward-slash path normalization
//!
//! Every path that crosses a snow API boundary is a forward-slash string,
//! regardless of OS. These helpers compose the usual dirname/join/relative
//! operations on top of that normalized form.

/// Normalize a path to forward-slash form.
///
/// - backslashes become `/`
/// - `.` segments are dropped, `..` segments pop their parent
/// - trailing separators are stripped, except on a bare root (`/`, `C:/`)
/// - `""` and `"."` both normalize to `""`
///
/// The function is idempotent: `normalize(normalize(p)) == normalize(p)`.
pub fn normalize(p: &str) -> String {
    let p = p.replace('\\', "/");

    let absolute = p.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    let mut drive: Option<&str> = None;

    for (i, seg) in p.split('/').enumerate() {
        if i == 0 && is_drive(seg) {
            drive = Some(seg);
            continue;
        }
        match seg {
            "" | "." => {}
            ".." => {
                let relative_base = segments.is_empty() && !absolute && drive.is_none();
                if relative_base || segments.last() == Some(&"..") {
                    segments.push("..");
                } else {
                    // `..` at an absolute or drive root stays at the root
                    segments.pop();
                }
            }
            s => segments.push(s),
        }
    }

    let body = segments.join("/");
    match (drive, absolute) {
        (Some(d), _) => {
            if body.is_empty() {
                format!("{}/", d)
            } else {
                format!("{}/{}", d, body)
            }
        }
        (None, true) => format!("/{}", body),
        (None, false) => body,
    }
}

fn is_drive(seg: &str) -> bool {
    let bytes = seg.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Join two path fragments and normalize the result
pub fn join(base: &str, rest: &str) -> String {
    if base.is_empty() {
        return normalize(rest);
    }
    if rest.is_empty() {
        return normalize(base);
    }
    normalize(&format!("{}/{}", base, rest))
}

/// Parent directory of a normalized path.
///
/// `dirname("a/b") == "a"`, `dirname("a") == ""`, `dirname("/a") == "/"`.
pub fn dirname(p: &str) -> String {
    let n = normalize(p);
    if n == "/" || is_bare_root(&n) {
        return n;
    }
    match n.rfind('/') {
        None => String::new(),
        Some(0) => "/".to_string(),
        Some(idx) => {
            let parent = &n[..idx];
            if is_drive(parent) {
                format!("{}/", parent)
            } else {
                parent.to_string()
            }
        }
    }
}

fn is_bare_root(n: &str) -> bool {
    n.len() == 3 && is_drive(&n[..2]) && n.ends_with('/')
}

/// Final component of a normalized path
pub fn basename(p: &str) -> String {
    let n = normalize(p);
    if n == "/" || is_bare_root(&n) {
        return String::new();
    }
    match n.rfind('/') {
        None => n,
        Some(idx) => n[idx + 1..].to_string(),
    }
}

/// Resolve a path to an absolute, normalized form
pub fn resolve(p: &str) -> String {
    let n = normalize(p);
    if n.starts_with('/') || n.get(..2).map(|s| is_drive(s)).unwrap_or(false) {
        return n;
    }
    let cwd = std::env::current_dir()
        .map(|c| c.to_string_lossy().into_owned())
        .unwrap_or_default();
    join(&cwd, &n)
}

/// Relative path from `from` to `to`, both resolved first.
///
/// Returns `""` when the two resolve to the same location.
pub fn relative(from: &str, to: &str) -> String {
    let from = resolve(from);
    let to = resolve(to);
    if from == to {
        return String::new();
    }

    let from_segs: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let to_segs: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from_segs
        .iter()
        .zip(to_segs.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out: Vec<&str> = Vec::new();
    for _ in common..from_segs.len() {
        out.push("..");
    }
    out.extend(&to_segs[common..]);
    out.join("/")
}
