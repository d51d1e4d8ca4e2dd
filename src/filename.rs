use chrono::Utc;
use uuid::Uuid;

/// Split a client-supplied name into (stem, extension), dropping any
/// directory components. The extension is empty when there is none.
fn split_name(filename: &str) -> (&str, &str) {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (base, ""),
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `-`, collapse runs of
/// hyphens and trim them from both ends.
fn clean(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

/// Turn a client name into a filesystem-safe one.
///
/// Returns `None` when nothing usable survives, which tells the caller to
/// fall back to [`generate_random_filename`]. With `normalize` off the name
/// is returned untouched.
pub fn sanitize_filename(filename: &str, normalize: bool) -> Option<String> {
    if !normalize {
        return Some(filename.to_string()).filter(|name| !name.is_empty());
    }

    let (stem, ext) = split_name(filename);
    let stem = clean(stem);
    if stem.is_empty() {
        return None;
    }

    let ext = clean(ext);
    if ext.is_empty() {
        Some(stem)
    } else {
        Some(format!("{}.{}", stem, ext))
    }
}

/// Append the detected extension when the name carries none of its own.
pub fn ensure_extension(filename: &str, extension: &str) -> String {
    let (_, current) = split_name(filename);
    if current.is_empty() {
        format!("{}.{}", filename, extension)
    } else {
        filename.to_string()
    }
}

/// `<time token>_<16 random hex chars>.<extension>`.
///
/// The time token is seconds and microseconds in hex, so names sort by
/// creation time; the random half comes from a v4 UUID.
pub fn generate_random_filename(extension: &str) -> String {
    let now = Utc::now();
    let token = format!("{:08x}{:05x}", now.timestamp(), now.timestamp_subsec_micros());
    let random: String = Uuid::new_v4().as_bytes()[..8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("{}_{}.{}", token, random, extension)
}

/// `photo.jpg` + 2 -> `photo_2.jpg`.
pub fn with_numeric_suffix(filename: &str, counter: u32) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, counter, ext),
        _ => format!("{}_{}", filename, counter),
    }
}
