use tracing::debug;

use super::{RemoteExecutor, shell_quote, split_lines};
use crate::error::BatchError;
use crate::model::FileOutput;

/// Reads the bytes appended to a remote file since the last read.
///
/// Only whole lines are consumed: a line still being written stays on the
/// remote side until its newline shows up, so it is never stored in two
/// pieces and multibyte characters are never cut at the offset.
pub struct TailReader<'a, E: RemoteExecutor> {
    executor: &'a E,
}

impl<'a, E: RemoteExecutor> TailReader<'a, E> {
    pub fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    /// Appends newly completed lines of `remote_path` to `output.content` and
    /// advances `output.last_size` past them. Returns the number of lines
    /// appended.
    ///
    /// A file that does not exist yet, or has not grown, reads as nothing.
    pub async fn read(&self, remote_path: &str, output: &mut FileOutput) -> Result<usize, BatchError> {
        self.read_delta(remote_path, output, false).await
    }

    /// Like [`read`](Self::read) but also takes an unterminated last line.
    /// For files that will not grow any more.
    pub async fn drain(&self, remote_path: &str, output: &mut FileOutput) -> Result<usize, BatchError> {
        self.read_delta(remote_path, output, true).await
    }

    async fn read_delta(
        &self,
        remote_path: &str,
        output: &mut FileOutput,
        take_partial: bool,
    ) -> Result<usize, BatchError> {
        let Some(size) = self.executor.file_size(remote_path).await? else {
            debug!(path = remote_path, "tail target does not exist yet");
            return Ok(0);
        };
        if size <= output.last_size {
            return Ok(0);
        }

        let command = format!(
            "tail -c +{} {} | head -c {}",
            output.last_size + 1,
            shell_quote(remote_path),
            size - output.last_size
        );
        let bytes = self.executor.execute_raw(&command).await?;
        let consumed = if take_partial {
            bytes.len()
        } else {
            bytes.iter().rposition(|b| *b == b'\n').map_or(0, |end| end + 1)
        };
        if consumed == 0 {
            debug!(path = remote_path, "no complete line yet");
            return Ok(0);
        }

        let lines = split_lines(&bytes[..consumed]);
        let appended = lines.len();
        output.content.extend(lines);
        output.last_size += consumed as u64;
        debug!(path = remote_path, appended, offset = output.last_size, "tail advanced");
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockRemote;

    fn tail_output() -> FileOutput {
        FileOutput {
            path: "out.log".into(),
            tail: true,
            content: Vec::new(),
            last_size: 0,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn reads_only_the_new_bytes() {
        let remote = MockRemote::new();
        remote.set_size("./j/out.log", 26);
        remote.respond(&["i have a tail", "asdfas"]);

        let mut output = tail_output();
        output.content.push("earlier".into());
        output.last_size = 5;

        let appended = TailReader::new(&remote)
            .read("./j/out.log", &mut output)
            .await
            .unwrap();

        assert_eq!(appended, 2);
        assert_eq!(output.content, vec!["earlier", "i have a tail", "asdfas"]);
        assert_eq!(output.last_size, 26);
        assert_eq!(remote.commands(), vec!["tail -c +6 ./j/out.log | head -c 21"]);
    }

    #[tokio::test]
    async fn second_read_without_growth_is_a_no_op() {
        let remote = MockRemote::new();
        remote.set_size("./j/out.log", 18);
        remote.respond(&["line one", "line two"]);

        let reader = TailReader::new(&remote);
        let mut output = tail_output();
        reader.read("./j/out.log", &mut output).await.unwrap();
        let after_first = output.clone();

        let appended = reader.read("./j/out.log", &mut output).await.unwrap();

        assert_eq!(appended, 0);
        assert_eq!(output, after_first);
        assert_eq!(remote.commands().len(), 1);
    }

    #[tokio::test]
    async fn half_written_line_waits_for_its_newline() {
        let remote = MockRemote::new();
        let reader = TailReader::new(&remote);
        let mut output = tail_output();

        remote.set_size("./j/out.log", 9);
        remote.respond_raw(b"hello wor");
        assert_eq!(reader.read("./j/out.log", &mut output).await.unwrap(), 0);
        assert!(output.content.is_empty());
        assert_eq!(output.last_size, 0);

        remote.set_size("./j/out.log", 12);
        remote.respond_raw(b"hello world\n");
        assert_eq!(reader.read("./j/out.log", &mut output).await.unwrap(), 1);

        assert_eq!(output.content, vec!["hello world"]);
        assert_eq!(output.last_size, 12);
        assert_eq!(remote.commands()[1], "tail -c +1 ./j/out.log | head -c 12");
    }

    #[tokio::test]
    async fn offset_stops_after_the_last_complete_line() {
        let remote = MockRemote::new();
        remote.set_size("./j/out.log", 6);
        remote.respond_raw(b"one\ntw");
        let mut output = tail_output();

        TailReader::new(&remote)
            .read("./j/out.log", &mut output)
            .await
            .unwrap();

        assert_eq!(output.content, vec!["one"]);
        assert_eq!(output.last_size, 4);
    }

    #[tokio::test]
    async fn multibyte_character_is_not_split() {
        let remote = MockRemote::new();
        let reader = TailReader::new(&remote);
        let mut output = tail_output();

        remote.set_size("./j/out.log", 4);
        remote.respond_raw(&"caf\u{e9}".as_bytes()[..4]);
        reader.read("./j/out.log", &mut output).await.unwrap();
        assert!(output.content.is_empty());

        remote.set_size("./j/out.log", 6);
        remote.respond_raw("caf\u{e9}\n".as_bytes());
        reader.read("./j/out.log", &mut output).await.unwrap();

        assert_eq!(output.content, vec!["caf\u{e9}"]);
        assert_eq!(output.last_size, 6);
    }

    #[tokio::test]
    async fn drain_takes_the_unterminated_last_line() {
        let remote = MockRemote::new();
        remote.set_size("./j/out.log", 15);
        remote.respond_raw(b"one\nlast words");
        let mut output = tail_output();

        let appended = TailReader::new(&remote)
            .drain("./j/out.log", &mut output)
            .await
            .unwrap();

        assert_eq!(appended, 2);
        assert_eq!(output.content, vec!["one", "last words"]);
        assert_eq!(output.last_size, 15);
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let remote = MockRemote::new();
        let mut output = tail_output();

        let appended = TailReader::new(&remote)
            .read("./j/out.log", &mut output)
            .await
            .unwrap();

        assert_eq!(appended, 0);
        assert!(output.content.is_empty());
        assert_eq!(output.last_size, 0);
        assert!(remote.commands().is_empty());
    }

    #[tokio::test]
    async fn shrunk_file_never_moves_the_offset_back() {
        let remote = MockRemote::new();
        remote.set_size("./j/out.log", 3);
        let mut output = tail_output();
        output.last_size = 10;

        TailReader::new(&remote)
            .read("./j/out.log", &mut output)
            .await
            .unwrap();

        assert_eq!(output.last_size, 10);
    }
}
