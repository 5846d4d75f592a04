/// Split text into terms on Unicode whitespace.
///
/// No case folding, stemming or stopword removal: terms are matched
/// literally. Persisted snapshots store postings keyed by these exact terms,
/// so any change here breaks scores computed against existing snapshots.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}
