use anstream::eprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Printer {
    /// Progress messages go to stderr.
    Default,
    /// Progress is suppressed; results still go to stdout.
    Quiet,
    /// Progress plus whatever tracing emits.
    Verbose,
}

impl std::fmt::Write for Printer {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        match self {
            Self::Default | Self::Verbose => {
                #[allow(clippy::print_stderr, clippy::ignored_unit_patterns)]
                {
                    eprint!("{s}");
                }
            }
            Self::Quiet => {}
        }
        Ok(())
    }
}
