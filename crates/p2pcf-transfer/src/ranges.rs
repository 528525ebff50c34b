//! Compact index-set encoding: sorted indices as `"a-b,c,d-e"`.

use p2pcf_core::{P2pError, P2pResult};

/// Encode indices as comma-separated runs. Input need not be sorted;
/// duplicates collapse.
pub fn encode_ranges(indices: &[u32]) -> String {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts: Vec<String> = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;
    for i in iter {
        if end.checked_add(1) == Some(i) {
            end = i;
            continue;
        }
        parts.push(run(start, end));
        start = i;
        end = i;
    }
    parts.push(run(start, end));
    parts.join(",")
}

fn run(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// Decode a range string, rejecting anything outside `[0, total)`.
///
/// Returns sorted, de-duplicated indices. The empty string is the empty set.
pub fn decode_ranges(s: &str, total: u32) -> P2pResult<Vec<u32>> {
    let mut out = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (parse_index(a, part)?, parse_index(b, part)?),
            None => {
                let i = parse_index(part, part)?;
                (i, i)
            }
        };
        if start > end {
            return Err(P2pError::validation(format!("descending range {part:?}")));
        }
        if end >= total {
            return Err(P2pError::validation(format!(
                "range {part:?} out of bounds for {total} chunks"
            )));
        }
        out.extend(start..=end);
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

fn parse_index(s: &str, part: &str) -> P2pResult<u32> {
    s.trim()
        .parse()
        .map_err(|_| P2pError::validation(format!("bad range entry {part:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode() {
        assert_eq!(encode_ranges(&[]), "");
        assert_eq!(encode_ranges(&[9]), "9");
        assert_eq!(encode_ranges(&[0, 1, 2, 5, 7, 8]), "0-2,5,7-8");
        assert_eq!(encode_ranges(&[8, 7, 7, 0]), "0,7-8");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode_ranges("", 10).unwrap(), Vec::<u32>::new());
        assert_eq!(decode_ranges("0-2, 5,7-8", 10).unwrap(), vec![0, 1, 2, 5, 7, 8]);
        assert_eq!(decode_ranges("3,1-3", 10).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for bad in ["x", "1-", "-2", "4-2", "1-2-3", "10", "0-10"] {
            assert!(
                matches!(decode_ranges(bad, 10), Err(P2pError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    proptest! {
        #[test]
        fn encode_decode_same_set(set in proptest::collection::btree_set(0u32..500, 0..100)) {
            let indices: Vec<u32> = set.iter().copied().collect();
            let encoded = encode_ranges(&indices);
            prop_assert_eq!(decode_ranges(&encoded, 500).unwrap(), indices);
        }
    }
}
