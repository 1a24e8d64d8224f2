//! Line-oriented console transport used by the binary.
//!
//! Input, one event per line:
//!
//! ```text
//! <chat-id> /start            restart (also /help)
//! <chat-id> /examples         sample image per style (also "examples")
//! <chat-id> photo <path>      upload the file at <path>
//! <chat-id> <anything else>   style choice, e.g. "42 3"
//! ```
//!
//! Replies are printed as `[<chat-id>] <text>`.  Stylized images are written
//! to the output directory as `<chat-id>-<n>.jpg`, style samples as
//! `<chat-id>-example-<style>.jpg`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{Outbound, ReplySink, SessionKey, TransportError};
use crate::session::{Reply, SessionEvent};
use crate::style::StyleId;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// What a console line asks for, before any file is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Restart,
    Examples,
    Photo(PathBuf),
    Text(String),
}

impl ConsoleInput {
    /// Turn the input into a session event, reading photo files from disk.
    pub async fn into_event(self) -> Result<SessionEvent, TransportError> {
        Ok(match self {
            ConsoleInput::Restart => SessionEvent::Restart,
            ConsoleInput::Examples => SessionEvent::ShowExamples,
            ConsoleInput::Photo(path) => SessionEvent::PhotoReceived(tokio::fs::read(&path).await?),
            ConsoleInput::Text(text) => SessionEvent::StyleChosen(text),
        })
    }
}

/// Parse one input line.  Blank lines and `#` comments yield `None`, as do
/// lines with a chat id but no command.
///
/// ```
/// use neural_style::transport::console::{parse_line, ConsoleInput};
///
/// let (key, input) = parse_line("42 /start").unwrap();
/// assert_eq!(key.as_str(), "42");
/// assert_eq!(input, ConsoleInput::Restart);
///
/// assert!(parse_line("   ").is_none());
/// ```
pub fn parse_line(line: &str) -> Option<(SessionKey, ConsoleInput)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    let input = match rest.split_once(char::is_whitespace) {
        _ if rest == "/start" || rest == "/help" => ConsoleInput::Restart,
        _ if rest == "/examples" || rest == "examples" => ConsoleInput::Examples,
        Some(("photo", path)) if !path.trim().is_empty() => {
            ConsoleInput::Photo(PathBuf::from(path.trim()))
        }
        _ => ConsoleInput::Text(rest.to_string()),
    };
    Some((SessionKey::from(key), input))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Text for every reply except the image itself.
pub fn render(reply: &Reply) -> String {
    match reply {
        Reply::StyleMenu(styles) if styles.is_empty() => {
            "No styles are installed yet.".to_string()
        }
        Reply::StyleMenu(styles) => {
            let mut text = String::from("Available styles:\n");
            for style in styles {
                text.push_str(&format!("  {}) {}\n", style.id.get(), style.display_name));
            }
            text.push_str("To choose a style, send its number.");
            text
        }
        Reply::Examples(examples) if examples.is_empty() => {
            "No example images are available yet.".to_string()
        }
        Reply::Examples(examples) => {
            let mut text = String::from("Examples, numbered like the styles:");
            for example in examples {
                text.push_str(&format!(
                    "\n  {}) {}",
                    example.style.id.get(),
                    example.style.display_name
                ));
            }
            text
        }
        Reply::StyleSelected(style) => format!(
            "You chose style {}. Now send a photo.",
            style.display_name
        ),
        Reply::InvalidStyleInput { available: 0, .. } => {
            "No styles are available right now.".to_string()
        }
        Reply::InvalidStyleInput { input, available } => format!(
            "Invalid input '{input}'. There is no such style; enter a number from 1 to {available}."
        ),
        Reply::ChooseStyleFirst => "Choose a style before sending a photo.".to_string(),
        Reply::UnsupportedImage => {
            "That file is not a supported image. Send a JPEG or PNG photo.".to_string()
        }
        Reply::ProcessingStarted => {
            "I started processing your photo. This may take a while...".to_string()
        }
        Reply::WorkInProgress => "Still working on your previous photo, please wait.".to_string(),
        Reply::StylizedResult(image) => {
            format!("Done! ({}x{}) Send another style number to try again.", image.width, image.height)
        }
        Reply::JobFailed(e) => format!("Stylization failed: {e}. Choose a style to try again."),
        Reply::NotStarted => "Send /start to begin.".to_string(),
        Reply::ServiceUnavailable(reason) => {
            format!("Styles are unavailable right now ({reason}). Try /start again later.")
        }
    }
}

/// Prints replies to a writer and saves result images to a directory.
pub struct ConsoleSink<W> {
    out: Mutex<W>,
    output_dir: PathBuf,
    saved: AtomicU64,
}

impl<W> ConsoleSink<W> {
    pub fn new(out: W, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            out: Mutex::new(out),
            output_dir: output_dir.into(),
            saved: AtomicU64::new(0),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn image_path(&self, key: &SessionKey) -> PathBuf {
        let n = self.saved.fetch_add(1, Ordering::SeqCst) + 1;
        self.output_dir.join(format!("{}-{n}.jpg", file_stem(key)))
    }

    fn example_path(&self, key: &SessionKey, style: StyleId) -> PathBuf {
        self.output_dir
            .join(format!("{}-example-{}.jpg", file_stem(key), style.get()))
    }
}

#[async_trait]
impl<W> ReplySink for ConsoleSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn deliver(&self, outbound: Outbound) -> Result<(), TransportError> {
        let Outbound { key, reply } = outbound;
        let mut text = render(&reply);

        match &reply {
            Reply::StylizedResult(image) => {
                tokio::fs::create_dir_all(&self.output_dir).await?;
                let path = self.image_path(&key);
                tokio::fs::write(&path, &image.jpeg).await?;
                text.push_str(&format!("\nSaved to {}", path.display()));
            }
            Reply::Examples(examples) if !examples.is_empty() => {
                tokio::fs::create_dir_all(&self.output_dir).await?;
                for example in examples {
                    let path = self.example_path(&key, example.style.id);
                    tokio::fs::write(&path, &example.jpeg).await?;
                    text.push_str(&format!(
                        "\n{}) saved to {}",
                        example.style.id.get(),
                        path.display()
                    ));
                }
            }
            _ => {}
        }

        let mut out = self.out.lock().await;
        for line in text.lines() {
            out.write_all(format!("[{key}] {line}\n").as_bytes()).await?;
        }
        out.flush().await?;
        Ok(())
    }
}

fn file_stem(key: &SessionKey) -> String {
    key.as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::StylizedImage;
    use crate::inference::JobError;
    use crate::style::{StyleDescriptor, StyleExample};
    use tempfile::tempdir;

    fn descriptor(n: u32, name: &str) -> StyleDescriptor {
        StyleDescriptor {
            id: StyleId::new(n).unwrap(),
            artifact: name.to_lowercase(),
            display_name: name.into(),
        }
    }

    // ---- parse_line ---

    #[test]
    fn parses_commands() {
        assert_eq!(
            parse_line("7 /help"),
            Some((SessionKey::from("7"), ConsoleInput::Restart))
        );
        assert_eq!(
            parse_line("7 photo  /tmp/cat.png "),
            Some((
                SessionKey::from("7"),
                ConsoleInput::Photo(PathBuf::from("/tmp/cat.png"))
            ))
        );
        assert_eq!(
            parse_line("alice   2"),
            Some((SessionKey::from("alice"), ConsoleInput::Text("2".into())))
        );
    }

    #[test]
    fn parses_examples_request() {
        for line in ["7 /examples", "7 examples"] {
            assert_eq!(
                parse_line(line),
                Some((SessionKey::from("7"), ConsoleInput::Examples))
            );
        }
    }

    #[test]
    fn photo_without_path_is_text() {
        assert_eq!(
            parse_line("7 photo"),
            Some((SessionKey::from("7"), ConsoleInput::Text("photo".into())))
        );
    }

    #[test]
    fn ignores_blank_comments_and_bare_keys() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("# note"), None);
        assert_eq!(parse_line("42"), None);
        assert_eq!(parse_line("42    "), None);
    }

    #[tokio::test]
    async fn photo_input_reads_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let event = ConsoleInput::Photo(path).into_event().await.unwrap();
        assert!(matches!(event, SessionEvent::PhotoReceived(b) if b == [1, 2, 3]));

        let missing = ConsoleInput::Photo(dir.path().join("nope")).into_event().await;
        assert!(matches!(missing, Err(TransportError::Io(_))));
    }

    // ---- render ---

    #[test]
    fn menu_lists_styles_in_order() {
        let text = render(&Reply::StyleMenu(vec![
            descriptor(1, "Candy"),
            descriptor(2, "Starry Night"),
        ]));
        let candy = text.find("1) Candy").unwrap();
        let starry = text.find("2) Starry Night").unwrap();
        assert!(candy < starry);
    }

    #[test]
    fn examples_are_listed_by_style_number() {
        let text = render(&Reply::Examples(vec![StyleExample {
            style: descriptor(3, "Udnie"),
            jpeg: vec![0xFF, 0xD8],
        }]));
        assert!(text.contains("3) Udnie"));
        assert!(render(&Reply::Examples(Vec::new())).contains("No example"));
    }

    #[test]
    fn invalid_input_names_the_range() {
        let text = render(&Reply::InvalidStyleInput {
            input: "9".into(),
            available: 3,
        });
        assert!(text.contains("1 to 3"));
    }

    #[test]
    fn failures_include_the_reason() {
        let text = render(&Reply::JobFailed(JobError::ShuttingDown));
        assert!(text.contains("shutting down"));
    }

    // ---- ConsoleSink ---

    #[tokio::test]
    async fn sink_prints_prefixed_lines() {
        let dir = tempdir().unwrap();
        let sink = ConsoleSink::new(Vec::<u8>::new(), dir.path());
        sink.deliver(Outbound {
            key: SessionKey::from("42"),
            reply: Reply::NotStarted,
        })
        .await
        .unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "[42] Send /start to begin.\n");
    }

    #[tokio::test]
    async fn sink_saves_result_images() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out");
        let sink = ConsoleSink::new(Vec::<u8>::new(), &output);
        let image = StylizedImage {
            width: 2,
            height: 2,
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
        };

        for _ in 0..2 {
            sink.deliver(Outbound {
                key: SessionKey::from("chat/7"),
                reply: Reply::StylizedResult(image.clone()),
            })
            .await
            .unwrap();
        }

        assert_eq!(std::fs::read(output.join("chat_7-1.jpg")).unwrap(), image.jpeg);
        assert!(output.join("chat_7-2.jpg").exists());
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.contains("chat_7-2.jpg"));
    }

    #[tokio::test]
    async fn sink_saves_examples_under_their_style_number() {
        let dir = tempdir().unwrap();
        let sink = ConsoleSink::new(Vec::<u8>::new(), dir.path());
        let examples = vec![
            StyleExample {
                style: descriptor(1, "Candy"),
                jpeg: vec![1],
            },
            StyleExample {
                style: descriptor(3, "Udnie"),
                jpeg: vec![3],
            },
        ];
        sink.deliver(Outbound {
            key: SessionKey::from("42"),
            reply: Reply::Examples(examples),
        })
        .await
        .unwrap();

        assert_eq!(std::fs::read(dir.path().join("42-example-1.jpg")).unwrap(), [1]);
        assert_eq!(std::fs::read(dir.path().join("42-example-3.jpg")).unwrap(), [3]);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.starts_with("[42] Examples"));
        assert!(out.contains("[42] 3) saved to"));
    }
}
