use crate::protocol::{DiffResult, FileRecord};

/// Classifies the files of two catalogs.
///
/// `modified` holds the server side record of every (name, path) pair whose
/// digests differ. Outputs keep the relative order of their input catalog.
pub fn compute_diff(server: &[FileRecord], client: &[FileRecord]) -> DiffResult {
    let mut diff = DiffResult::default();

    for s in server {
        for c in client {
            if s.same_file(c) && s.hash != c.hash {
                diff.modified.push(s.clone());
            }
        }
    }

    diff.client_new = client
        .iter()
        .filter(|c| !server.iter().any(|s| s.same_file(c)))
        .cloned()
        .collect();

    diff.server_new = server
        .iter()
        .filter(|s| !client.iter().any(|c| c.same_file(s)))
        .cloned()
        .collect();

    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, hash: u8) -> FileRecord {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        FileRecord {
            name,
            hash: [hash; 16],
            path: path.to_string(),
            size: 1,
        }
    }

    fn paths(files: &[FileRecord]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn new_files_on_each_side() {
        let server = vec![file("a", 1), file("b", 2)];
        let client = vec![file("a", 1), file("c", 3)];
        let d = compute_diff(&server, &client);
        assert_eq!(paths(&d.client_new), vec!["c"]);
        assert_eq!(paths(&d.server_new), vec!["b"]);
        assert!(d.modified.is_empty());
    }

    #[test]
    fn differing_digest_is_modified() {
        let server = vec![file("a", 1)];
        let client = vec![file("a", 9)];
        let d = compute_diff(&server, &client);
        assert_eq!(d.modified, vec![file("a", 1)]);
        assert!(d.client_new.is_empty());
        assert!(d.server_new.is_empty());
    }

    #[test]
    fn identical_catalogs_are_unchanged() {
        let files = vec![file("a", 1), file("x/b", 2), file("x/y/c", 3)];
        assert!(compute_diff(&files, &files).is_empty());
        assert!(compute_diff(&files, &files.clone()).is_empty());
    }

    #[test]
    fn same_name_in_other_directory_is_a_different_file() {
        let server = vec![file("one/a", 1)];
        let client = vec![file("two/a", 1)];
        let d = compute_diff(&server, &client);
        assert_eq!(paths(&d.client_new), vec!["two/a"]);
        assert_eq!(paths(&d.server_new), vec!["one/a"]);
    }

    #[test]
    fn comparison_is_case_sensitive() {
        let d = compute_diff(&[file("A", 1)], &[file("a", 1)]);
        assert_eq!(d.client_new.len(), 1);
        assert_eq!(d.server_new.len(), 1);
    }

    #[test]
    fn sets_are_disjoint_and_swap_with_sides() {
        let server = vec![file("a", 1), file("b", 2), file("d/e", 5), file("f", 6)];
        let client = vec![file("a", 1), file("c", 3), file("d/e", 4), file("g", 7)];
        let d = compute_diff(&server, &client);

        for f in &d.modified {
            assert!(!d.client_new.iter().any(|x| x.same_file(f)));
            assert!(!d.server_new.iter().any(|x| x.same_file(f)));
        }
        for f in &d.client_new {
            assert!(!d.server_new.iter().any(|x| x.same_file(f)));
        }
        // anything unlisted has equal digests on both sides
        for s in &server {
            let listed = d
                .modified
                .iter()
                .chain(&d.server_new)
                .chain(&d.client_new)
                .any(|x| x.same_file(s));
            if !listed {
                let c = client.iter().find(|c| c.same_file(s)).unwrap();
                assert_eq!(c.hash, s.hash);
            }
        }

        let swapped = compute_diff(&client, &server);
        assert_eq!(d.client_new, swapped.server_new);
        assert_eq!(d.server_new, swapped.client_new);
        assert_eq!(paths(&d.modified), paths(&swapped.modified));
    }

    #[test]
    fn output_keeps_input_order() {
        let client = vec![file("z", 1), file("m", 1), file("a", 1)];
        let d = compute_diff(&[], &client);
        assert_eq!(paths(&d.client_new), vec!["z", "m", "a"]);
    }

    #[test]
    fn duplicate_identities_contribute_every_pair() {
        let server = vec![file("a", 1)];
        let client = vec![file("a", 2), file("a", 3)];
        assert_eq!(compute_diff(&server, &client).modified.len(), 2);
    }
}
