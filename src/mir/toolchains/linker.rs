use std::fmt;

pub trait Linker: fmt::Debug + Send + Sync {
    fn id(&self) -> &'static str;

    /// The command used to invoke this linker. Dynamic linking goes through
    /// the compiler driver, so for the gnu family this is the compiler's own
    /// command.
    fn command(&self) -> &[String];

    fn output_command(&self, output: &str) -> Vec<String>;

    fn always_args(&self) -> Vec<String>;
}

/// The GNU BFD linker, driven through the compiler front end
#[derive(Debug)]
pub struct Gnu {
    command: Vec<String>,
}

impl Gnu {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Linker for Gnu {
    fn id(&self) -> &'static str {
        "ld.bfd"
    }

    fn command(&self) -> &[String] {
        &self.command
    }

    fn output_command(&self, output: &str) -> Vec<String> {
        vec!["-o".to_owned(), output.to_owned()]
    }

    fn always_args(&self) -> Vec<String> {
        Vec::new()
    }
}
