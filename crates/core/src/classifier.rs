/// True when the lower-cased query contains any lower-cased uploaded file name.
///
/// This is a raw substring test with no tokenization, so very short or generic
/// file names (`a.txt`, `notes`) can match queries that were not about them.
pub fn is_file_specific<I, S>(query: &str, uploaded_file_names: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let query = query.to_lowercase();
    uploaded_file_names.into_iter().any(|name| {
        let name = name.as_ref().to_lowercase();
        !name.is_empty() && query.contains(&name)
    })
}

#[cfg(test)]
mod tests {
    use super::is_file_specific;

    #[test]
    fn matches_file_names_case_insensitively() {
        let names = ["Report-2024.pdf", "notes.txt"];
        assert!(is_file_specific("What does REPORT-2024.PDF say about margins?", names));
        assert!(is_file_specific("summarize notes.txt", names));
        assert!(!is_file_specific("summarize my notes", names));
    }

    #[test]
    fn no_uploads_means_never_file_specific() {
        assert!(!is_file_specific("notes.txt", Vec::<String>::new()));
    }

    #[test]
    fn substring_match_can_produce_false_positives() {
        assert!(is_file_specific("what is a.txt-like format", ["a.txt"]));
    }
}
