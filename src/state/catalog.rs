/// Immutable definition of a single challenge, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDefinition {
    /// Identifier, unique within the session catalog.
    pub id: String,
    /// Human readable title.
    pub title: String,
    /// Category label (e.g. "WEB", "CRYPTO").
    pub category: String,
    /// Points awarded to the first team solving the challenge.
    pub base_points: u32,
    /// Lower bound for the award, whatever the number of prior solves.
    pub floor_points: u32,
    /// Reduction applied for every team that solved the challenge before.
    pub decay: u32,
    /// Statement shown to the players.
    pub description: String,
    /// Expected answer. Never leaves the server.
    pub flag: String,
    /// Names of the attachments distributed with the statement.
    pub files: Vec<String>,
}

/// Example challenges used when a session is created without a catalog.
pub fn default_challenges() -> Vec<ChallengeDefinition> {
    vec![
        challenge(
            "misc1",
            "Sanity Check",
            "MISC",
            (100, 100, 0),
            "The flag is format{welcome}",
            "format{welcome}",
        ),
        challenge(
            "web1",
            "Inspector Gadget",
            "WEB",
            (500, 100, 50),
            "Check the HTML comments.",
            "format{html_master}",
        ),
        challenge(
            "crypto1",
            "Caesar Salad",
            "CRYPTO",
            (400, 100, 30),
            "Rot13 is classic.",
            "format{rot13_is_easy}",
        ),
        challenge(
            "bin1",
            "Buffer Ouch",
            "PWN",
            (800, 200, 100),
            "Overflow the buffer.",
            "format{segfault}",
        ),
    ]
}

fn challenge(
    id: &str,
    title: &str,
    category: &str,
    (base_points, floor_points, decay): (u32, u32, u32),
    description: &str,
    flag: &str,
) -> ChallengeDefinition {
    ChallengeDefinition {
        id: id.into(),
        title: title.into(),
        category: category.into(),
        base_points,
        floor_points,
        decay,
        description: description.into(),
        flag: flag.into(),
        files: Vec::new(),
    }
}
