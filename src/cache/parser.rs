use crate::error::LookupError;

const MAX_COMPONENTS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor<'a> {
    Relative,
    PosixRoot,
    Drive(char),
    Unc { server: &'a str, share: &'a str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath<'a> {
    pub anchor: Anchor<'a>,
    /// Components in input order; `.` and empty components are dropped,
    /// `..` is kept for the walk to interpret.
    pub components: Vec<&'a str>,
    pub trailing_separator: bool,
}

#[inline]
fn is_separator(ch: char) -> bool {
    ch == '/' || ch == '\\'
}

pub fn parse_path(input: &str, max_component: usize) -> Result<ParsedPath<'_>, LookupError> {
    let (anchor, remainder) = parse_anchor(input)?;
    let components = parse_components(remainder, max_component)?;
    let trailing_separator = !components.is_empty() && input.ends_with(is_separator);
    Ok(ParsedPath {
        anchor,
        components,
        trailing_separator,
    })
}

fn parse_anchor(input: &str) -> Result<(Anchor<'_>, &str), LookupError> {
    let bytes = input.as_bytes();
    if bytes.len() >= 2 && is_separator(bytes[0] as char) && is_separator(bytes[1] as char) {
        let rest = &input[2..];
        // \\?\ and \\.\ device namespaces.
        if rest.starts_with('?') || rest.starts_with('.') {
            return Err(LookupError::Unsupported);
        }
        let mut parts = rest.splitn(3, is_separator);
        let server = parts.next().filter(|p| !p.is_empty());
        let share = parts.next().filter(|p| !p.is_empty());
        let (Some(server), Some(share)) = (server, share) else {
            return Err(LookupError::Unsupported);
        };
        return Ok((Anchor::Unc { server, share }, parts.next().unwrap_or("")));
    }

    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        if bytes.len() == 2 || !is_separator(bytes[2] as char) {
            // Drive-relative paths ("C:foo") depend on per-drive state.
            return Err(LookupError::Unsupported);
        }
        let drive = (bytes[0] as char).to_ascii_uppercase();
        return Ok((Anchor::Drive(drive), &input[3..]));
    }

    if input.starts_with(is_separator) {
        return Ok((Anchor::PosixRoot, input.trim_start_matches(is_separator)));
    }

    Ok((Anchor::Relative, input))
}

fn parse_components(input: &str, max_component: usize) -> Result<Vec<&str>, LookupError> {
    let mut components = Vec::new();
    for part in input.split(is_separator) {
        if part.is_empty() || part == "." {
            continue;
        }
        if part.len() > max_component {
            return Err(LookupError::PathTooLong);
        }
        components.push(part);
        if components.len() > MAX_COMPONENTS {
            return Err(LookupError::PathTooLong);
        }
    }
    Ok(components)
}
