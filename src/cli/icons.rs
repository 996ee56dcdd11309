//! Styled status markers for CLI output.

use console::{style, StyledObject};

/// Green check.
pub fn success() -> StyledObject<&'static str> {
    style("✓").green()
}

/// Yellow bang.
pub fn warn() -> StyledObject<&'static str> {
    style("!").yellow()
}

/// Secondary detail line.
pub fn dim_arrow() -> StyledObject<&'static str> {
    style("→").dim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icons_render() {
        assert!(success().to_string().contains('✓'));
        assert!(warn().to_string().contains('!'));
        assert!(dim_arrow().to_string().contains('→'));
    }
}
