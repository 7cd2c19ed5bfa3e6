/// Normalizes a cluster name: lowercase, runs of non-alphanumerics collapsed
/// to a single `-`, leading and trailing `-` trimmed.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn collapses_and_trims() {
        assert_eq!(slugify("Prod Cluster"), "prod-cluster");
        assert_eq!(slugify("dev_eu--west/1"), "dev-eu-west-1");
        assert_eq!(slugify("--kind-kind--"), "kind-kind");
        assert_eq!(slugify("kobs"), "kobs");
        assert_eq!(slugify("***"), "");
    }
}
