//! Interactive title prompt.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const PROMPT: &str = "Type your task title and press Enter to send it: ";
const EMPTY_TITLE: &str = "Title cannot be empty. Please enter a valid title.";

/// Ask until a non-blank line is entered. `None` when input ends first.
pub async fn read_title<R, W>(input: &mut R, output: &mut W) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        line.clear();
        if input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let title = line.trim();
        if !title.is_empty() {
            return Ok(Some(title.to_string()));
        }

        output.write_all(EMPTY_TITLE.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
}
