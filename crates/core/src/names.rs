//! Agent name generation
//!
//! When a container is created without `--agent` or `--name`, the agent
//! gets a short random adjective-noun name (`swift-otter`). Names are
//! lowercase alphanumeric with a single hyphen, so they are always valid
//! as the final segment of a container name and as a label value.

const ADJECTIVES: &[&str] = &[
    "agile", "amber", "bold", "brave", "brisk", "calm", "clever", "cosmic", "crisp", "daring",
    "deft", "eager", "fleet", "gentle", "keen", "lively", "lucid", "mellow", "nimble", "plucky",
    "quick", "quiet", "rapid", "sharp", "silent", "sleek", "spry", "steady", "swift", "vivid",
    "wise", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "bison", "condor", "coyote", "crane", "dingo", "falcon", "ferret", "finch", "gecko",
    "heron", "ibex", "jackal", "lemur", "lynx", "macaw", "marten", "mole", "newt", "ocelot",
    "orca", "osprey", "otter", "panda", "puffin", "raven", "shrike", "stoat", "tapir", "viper",
    "wombat", "wren",
];

/// Generate a random `adjective-noun` agent name.
pub fn generate_agent_name() -> String {
    let adjective = ADJECTIVES[fastrand::usize(..ADJECTIVES.len())];
    let noun = NOUNS[fastrand::usize(..NOUNS.len())];
    format!("{adjective}-{noun}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_have_two_segments() {
        for _ in 0..64 {
            let name = generate_agent_name();
            let parts: Vec<&str> = name.split('-').collect();
            assert_eq!(parts.len(), 2, "unexpected name: {name}");
            assert!(ADJECTIVES.contains(&parts[0]));
            assert!(NOUNS.contains(&parts[1]));
        }
    }

    #[test]
    fn generated_names_are_label_safe() {
        for _ in 0..64 {
            let name = generate_agent_name();
            assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '-'));
        }
    }
}
