use crate::error::SipParseError;
use crate::header::Header;
use crate::message::{SipMessage, StartLine};
use crate::method::Method;

fn split_head_and_body(input: &str) -> (&str, &str) {
    if let Some(pos) = input.find("\r\n\r\n") {
        return (&input[..pos], &input[pos + 4..]);
    }
    if let Some(pos) = input.find("\n\n") {
        return (&input[..pos], &input[pos + 2..]);
    }
    (input, "")
}

fn parse_start_line(line: &str) -> Result<StartLine, SipParseError> {
    if line.starts_with("SIP/") {
        let mut parts = line.splitn(3, ' ');
        let _version = parts.next();
        let code = parts
            .next()
            .ok_or_else(|| SipParseError::start_line(line))?;
        let status = code
            .parse::<u16>()
            .ok()
            .filter(|s| (100..=699).contains(s))
            .ok_or_else(|| SipParseError::InvalidStatusCode {
                value: code.to_string(),
            })?;
        let reason = parts.next().unwrap_or("").trim().to_string();
        return Ok(StartLine::Response { status, reason });
    }

    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or_else(|| SipParseError::start_line(line))?;
    let uri = parts.next().ok_or_else(|| SipParseError::start_line(line))?;
    match parts.next() {
        Some(version) if version.starts_with("SIP/") => {}
        _ => return Err(SipParseError::start_line(line)),
    }
    Ok(StartLine::Request {
        method: Method::from(method),
        uri: uri.to_string(),
    })
}

fn parse_headers<'a, I>(lines: I) -> Result<Vec<Header>, SipParseError>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: Vec<Header> = Vec::new();
    for raw in lines {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        // folded continuation of the previous header value
        if line.starts_with(' ') || line.starts_with('\t') {
            match headers.last_mut() {
                Some(last) => {
                    last.value.push(' ');
                    last.value.push_str(line.trim());
                    continue;
                }
                None => return Err(SipParseError::header(line)),
            }
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SipParseError::header(line))?;
        headers.push(Header::new(name.trim(), value.trim()));
    }
    Ok(headers)
}

pub(crate) fn parse_message(input: &str) -> Result<SipMessage, SipParseError> {
    let input = input.trim_start_matches(|c: char| c == '\r' || c == '\n');
    let (head, body) = split_head_and_body(input);

    let mut lines = head.lines();
    let start_line = lines
        .next()
        .map(|l| l.trim_end_matches('\r').trim())
        .filter(|l| !l.is_empty())
        .ok_or(SipParseError::Empty)?;

    let start = parse_start_line(start_line)?;
    let headers = parse_headers(lines)?;
    Ok(SipMessage::from_parts(start, headers, body.to_string()))
}
