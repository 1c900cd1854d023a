use owo_colors::OwoColorize;
use supports_color::Stream;

pub fn color_enabled_stdout() -> bool {
    supports_color::on(Stream::Stdout).is_some()
}

pub fn sym_check(enabled: bool) -> String {
    if enabled { format!("{}", "✔".green().bold()) } else { "✔".to_string() }
}

pub fn sym_cross(enabled: bool) -> String {
    if enabled { format!("{}", "✖".red().bold()) } else { "x".to_string() }
}

/// Show only the first few characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(6).collect();
    if secret.chars().count() <= 6 {
        "*".repeat(secret.chars().count())
    } else {
        format!("{visible}…")
    }
}
