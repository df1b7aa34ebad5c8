use crate::tool::{CHALLENGE_PATH_PREFIX, HttpChallenge};

const CONTENT_MARKER: &str = "Create a file containing just this data";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum State {
    #[default]
    Scanning,
    ExpectContent,
    ExpectUrl {
        content: String,
    },
    Done,
}

/// Recognizes certbot's manual HTTP-01 prompt in its output, one line at a time.
///
/// ```text
/// Create a file containing just this data:
///
/// abc.token-thumbprint
///
/// And make it available on your web server at this URL:
///
/// http://example.com/.well-known/acme-challenge/abc
/// ```
#[derive(Debug, Default)]
pub struct PromptParser {
    state: State,
}

impl PromptParser {
    /// Feed the next output line. Returns the challenge once the prompt is complete.
    pub fn feed(&mut self, line: &str) -> Option<HttpChallenge> {
        let line = line.trim();
        match std::mem::take(&mut self.state) {
            State::Scanning => {
                if line.contains(CONTENT_MARKER) {
                    self.state = State::ExpectContent;
                }
                None
            }
            State::ExpectContent => {
                self.state = if line.is_empty() {
                    State::ExpectContent
                } else {
                    State::ExpectUrl {
                        content: line.to_string(),
                    }
                };
                None
            }
            State::ExpectUrl { content } => {
                let file_name = line
                    .find(CHALLENGE_PATH_PREFIX)
                    .map(|start| &line[start + CHALLENGE_PATH_PREFIX.len()..])
                    .filter(|file_name| !file_name.is_empty());
                match file_name {
                    Some(file_name) => {
                        self.state = State::Done;
                        Some(HttpChallenge {
                            file_name: file_name.to_string(),
                            file_content: content,
                        })
                    }
                    None => {
                        self.state = State::ExpectUrl { content };
                        None
                    }
                }
            }
            State::Done => {
                // A second prompt means the order covers more than one identifier
                if line.contains(CONTENT_MARKER) {
                    self.state = State::ExpectContent;
                } else {
                    self.state = State::Done;
                }
                None
            }
        }
    }
}
