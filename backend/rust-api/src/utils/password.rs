use serde::Serialize;

const COMMON_PATTERNS: [&str; 4] = ["123", "password", "qwerty", "abc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrengthLevel {
    Weak,
    Medium,
    Strong,
    VeryStrong,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PasswordStrength {
    pub strength: StrengthLevel,
    pub score: u32,
    pub feedback: Vec<&'static str>,
}

/// Scores a password 0-100 and lists what would make it stronger.
pub fn calculate_password_strength(password: &str) -> PasswordStrength {
    let mut score = 0;
    let mut feedback = Vec::new();

    let length = password.chars().count();
    if length >= 8 {
        score += 20;
    }
    if length >= 12 {
        score += 10;
    }
    if length >= 16 {
        score += 10;
    }

    let classes: [(fn(&char) -> bool, &'static str); 4] = [
        (char::is_ascii_lowercase, "Add lowercase letters"),
        (char::is_ascii_uppercase, "Add uppercase letters"),
        (char::is_ascii_digit, "Add numbers"),
        (|c| !c.is_ascii_alphanumeric(), "Add special characters (!@#$...)"),
    ];
    for (matches, hint) in classes {
        if password.chars().any(|c| matches(&c)) {
            score += 15;
        } else {
            feedback.push(hint);
        }
    }

    let lower = password.to_lowercase();
    if COMMON_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        feedback.push("Avoid common patterns");
    } else {
        score += 10;
    }
    let score = score.min(100);

    let strength = match score {
        s if s < 40 => StrengthLevel::Weak,
        s if s < 60 => StrengthLevel::Medium,
        s if s < 80 => StrengthLevel::Strong,
        _ => StrengthLevel::VeryStrong,
    };

    PasswordStrength {
        strength,
        score,
        feedback,
    }
}
