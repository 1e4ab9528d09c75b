//! Incremental scanner for `<execute_skill>` blocks in a streamed assistant
//! response. Fragments may split a tag across calls to [`InvocationParser::feed`];
//! the parser withholds any suffix that could be the start of a tag until
//! enough of the next fragment arrives to resolve it.

use thiserror::Error;

const OPEN_TAG: &str = "<execute_skill>";
const CLOSE_TAG: &str = "</execute_skill>";

/// A single closed `<execute_skill>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub skill_name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParserError {
    #[error("execute_skill block is missing a <skill_name> tag")]
    MissingSkillName,
    #[error("execute_skill block is missing a <code> tag")]
    MissingCode,
}

/// One unit of output from the parser: plain text outside a block, a closed
/// invocation, or a warning for a block that could not be parsed cleanly
/// (its raw text is always echoed back as a subsequent `Text` event so
/// nothing is silently dropped from the transcript).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    Text(String),
    Invocation(Invocation),
    Warning(String),
}

#[derive(Default)]
pub struct InvocationParser {
    pending: String,
    in_block: bool,
}

impl InvocationParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next stream fragment, returning whatever events it resolves.
    pub fn feed(&mut self, fragment: &str) -> Vec<ParseEvent> {
        self.pending.push_str(fragment);
        let mut events = Vec::new();

        loop {
            if !self.in_block {
                if let Some(idx) = self.pending.find(OPEN_TAG) {
                    let text = self.pending[..idx].to_string();
                    if !text.is_empty() {
                        events.push(ParseEvent::Text(text));
                    }
                    self.pending.drain(..idx + OPEN_TAG.len());
                    self.in_block = true;
                    continue;
                }
                let hold = partial_match_len(&self.pending, OPEN_TAG);
                let emit_len = self.pending.len() - hold;
                if emit_len > 0 {
                    let text = self.pending[..emit_len].to_string();
                    events.push(ParseEvent::Text(text));
                    self.pending.drain(..emit_len);
                }
                break;
            } else if let Some(idx) = self.pending.find(CLOSE_TAG) {
                let block = self.pending[..idx].to_string();
                self.pending.drain(..idx + CLOSE_TAG.len());
                self.in_block = false;
                match parse_block(&block) {
                    Ok(invocation) => events.push(ParseEvent::Invocation(invocation)),
                    Err(e) => {
                        events.push(ParseEvent::Warning(e.to_string()));
                        events.push(ParseEvent::Text(format!(
                            "{OPEN_TAG}{block}{CLOSE_TAG}"
                        )));
                    }
                }
                continue;
            } else {
                // Closing tag hasn't arrived yet; wait for more fragments.
                break;
            }
        }

        events
    }

    /// Signal end of stream. An open block at this point is malformed: its
    /// raw text (with the opening tag restored) is echoed back as a warning
    /// plus a trailing text event, matching a mid-stream malformed block.
    pub fn finish(mut self) -> Vec<ParseEvent> {
        if self.in_block {
            vec![
                ParseEvent::Warning(
                    "execute_skill block was never closed before the stream ended".to_string(),
                ),
                ParseEvent::Text(format!("{OPEN_TAG}{}", self.pending)),
            ]
        } else if !self.pending.is_empty() {
            vec![ParseEvent::Text(std::mem::take(&mut self.pending))]
        } else {
            Vec::new()
        }
    }
}

fn parse_block(block: &str) -> Result<Invocation, ParserError> {
    let skill_name = extract_tag(block, "skill_name").ok_or(ParserError::MissingSkillName)?;
    let code = extract_tag(block, "code").ok_or(ParserError::MissingCode)?;
    Ok(Invocation { skill_name: skill_name.trim().to_string(), code })
}

fn extract_tag(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    Some(block[start..end].to_string())
}

/// Length of the longest suffix of `buf` that is also a proper (non-empty,
/// shorter-than-whole) prefix of `tag` — i.e. the part of `buf`'s tail that
/// might be the beginning of `tag` split across a fragment boundary.
fn partial_match_len(buf: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(buf.len());
    for len in (1..=max).rev() {
        if buf.ends_with(&tag[..len]) {
            return len;
        }
    }
    0
}
