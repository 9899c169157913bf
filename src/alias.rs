use tracing::trace;

/// Issues table aliases `prefix1`, `prefix2`, ... for one compilation.
/// Numbers are never reused.
#[derive(Debug, Default)]
pub struct AliasAllocator {
    issued: usize,
}

impl AliasAllocator {
    pub fn new() -> Self {
        Self { issued: 0 }
    }
    pub fn next(&mut self, prefix: &str) -> String {
        self.issued += 1;
        let alias = format!("{prefix}{}", self.issued);
        trace!(%alias, "alias allocated");
        alias
    }
    /// How many aliases were handed out so far.
    pub fn count(&self) -> usize {
        self.issued
    }
}
