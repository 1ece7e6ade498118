//! A minimal line based command shell.

use async_trait::async_trait;
use log::{debug, warn};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Line oriented output shared by the shell and the tasks it spawns.
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// A console writing into memory, with a handle to read it back.
    pub fn capture() -> (Self, Capture) {
        let capture = Capture::default();
        (Self::new(capture.clone()), capture)
    }

    /// Writes `text` followed by a newline.
    pub fn line(&self, text: impl AsRef<str>) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(out, "{}", text.as_ref()).and_then(|_| out.flush()) {
            warn!("console write failed: {}", e);
        }
    }
}

#[derive(Clone, Default)]
pub struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    pub fn contents(&self) -> String {
        match self.buf.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl Write for Capture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .buf
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "capture poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ShellCommand: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Runs the command. `args[0]` is the command name. Returns the exit
    /// status.
    async fn run(&self, args: &[String], console: &Console) -> i32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotingError;

/// Splits a line into words. Double quotes group words and are removed.
pub fn tokenize(line: &str) -> Result<Vec<String>, QuotingError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                word.push(c);
                in_word = true;
            }
        }
    }

    if quoted {
        return Err(QuotingError);
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

pub struct Shell {
    commands: Vec<Box<dyn ShellCommand>>,
    console: Console,
}

impl Shell {
    pub fn new(commands: Vec<Box<dyn ShellCommand>>, console: Console) -> Self {
        Self { commands, console }
    }

    /// Reads and executes lines until end of input.
    pub async fn run<R: AsyncBufRead + Unpin>(&self, reader: R) -> io::Result<()> {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            self.execute(&line).await;
        }
        debug!("shell input closed");
        Ok(())
    }

    /// Executes one line. Returns the command's exit status, or `None` if
    /// nothing ran.
    pub async fn execute(&self, line: &str) -> Option<i32> {
        let args = match tokenize(line) {
            Ok(args) => args,
            Err(QuotingError) => {
                self.console.line("shell: incorrect quoting");
                return None;
            }
        };
        let name = args.first()?;

        if name == "help" {
            self.help();
            return Some(0);
        }

        match self.commands.iter().find(|c| c.name() == name) {
            Some(command) => Some(command.run(&args, &self.console).await),
            None => {
                self.console
                    .line(format!("shell: command not found: {}", name));
                None
            }
        }
    }

    fn help(&self) {
        self.console
            .line(format!("{:<15} {}", "Command", "Description"));
        self.console.line("---------------------------------------");
        for command in &self.commands {
            self.console
                .line(format!("{:<15} {}", command.name(), command.description()));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ShellCommand for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Print the arguments"
        }

        async fn run(&self, args: &[String], console: &Console) -> i32 {
            console.line(args[1..].join("|"));
            args.len() as i32 - 1
        }
    }

    fn shell() -> (Shell, Capture) {
        let (console, capture) = Console::capture();
        (Shell::new(vec![Box::new(Echo)], console), capture)
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("  coap  get ::1 ").unwrap(), vec!["coap", "get", "::1"]);
        assert_eq!(
            tokenize(r#"coap post ::1 5683 /x "hello world""#).unwrap(),
            vec!["coap", "post", "::1", "5683", "/x", "hello world"]
        );
        assert_eq!(tokenize(r#"a "" b"#).unwrap(), vec!["a", "", "b"]);
        assert!(tokenize("").unwrap().is_empty());
        assert_eq!(tokenize(r#"echo "open"#), Err(QuotingError));
    }

    #[tokio::test]
    async fn test_execute() {
        let (shell, capture) = shell();
        assert_eq!(shell.execute("echo a \"b c\"").await, Some(2));
        assert_eq!(shell.execute("   ").await, None);
        assert_eq!(shell.execute("nope").await, None);
        assert_eq!(
            capture.contents(),
            "a|b c\nshell: command not found: nope\n"
        );
    }

    #[test]
    fn test_run_until_eof() {
        let (shell, capture) = shell();
        let input: &[u8] = b"echo one\nhelp\necho \"two\n";
        tokio_test::block_on(shell.run(input)).unwrap();

        let output = capture.contents();
        assert!(output.starts_with("one\n"));
        assert!(output.contains("echo            Print the arguments"));
        assert!(output.ends_with("shell: incorrect quoting\n"));
    }
}
