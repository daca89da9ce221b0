//! Overlapping `(current, next)` pairing for teardown-ahead execution.
//!
//! The execution engine needs to know which test comes next so it can keep
//! shared fixtures alive across consecutive tests. Work arrives from the master
//! in batches of unknown size, so the pairer runs exactly one position behind
//! the stream: it holds the most recent item until its successor (or the end of
//! the stream) is known.

/// Incremental pairer. Feed items with [`WorkPairer::push`], then drain the
/// final pair with [`WorkPairer::finish`].
#[derive(Debug)]
pub struct WorkPairer<T> {
    staged: Option<T>,
}

impl<T> Default for WorkPairer<T> {
    fn default() -> Self {
        Self { staged: None }
    }
}

impl<T: Clone> WorkPairer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `item`; returns the pair for the previously staged item, if any.
    pub fn push(&mut self, item: T) -> Option<(T, Option<T>)> {
        let previous = self.staged.replace(item.clone());
        previous.map(|current| (current, Some(item)))
    }

    /// Item waiting for its successor.
    pub fn staged(&self) -> Option<&T> {
        self.staged.as_ref()
    }

    /// End of stream: the staged item (if any) runs with no successor.
    pub fn finish(self) -> Option<(T, Option<T>)> {
        self.staged.map(|current| (current, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_all<T: Clone, I: IntoIterator<Item = T>>(items: I) -> Vec<(T, Option<T>)> {
        let mut pairer = WorkPairer::new();
        let mut pairs: Vec<_> = items
            .into_iter()
            .filter_map(|item| pairer.push(item))
            .collect();
        pairs.extend(pairer.finish());
        pairs
    }

    fn assert_chain(items: &[&str], pairs: &[(&str, Option<&str>)]) {
        assert_eq!(pairs.len(), items.len());
        for window in pairs.windows(2) {
            assert_eq!(Some(window[1].0), window[0].1);
        }
        let terminal = pairs.iter().filter(|(_, next)| next.is_none()).count();
        assert_eq!(terminal, usize::from(!items.is_empty()));
        if let Some(last) = pairs.last() {
            assert_eq!(last.1, None);
        }
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let pairs: Vec<(&str, Option<&str>)> = pair_all(Vec::<&str>::new());
        assert!(pairs.is_empty());
    }

    #[test]
    fn single_item_pairs_with_none() {
        assert_eq!(pair_all(["a"]), vec![("a", None)]);
    }

    #[test]
    fn pairs_overlap_across_batches() {
        let mut pairer = WorkPairer::new();
        let mut pairs = Vec::new();
        for batch in [vec!["a", "b"], vec!["c"]] {
            pairs.extend(batch.into_iter().filter_map(|id| pairer.push(id)));
        }
        assert_eq!(pairer.staged(), Some(&"c"));
        pairs.extend(pairer.finish());
        assert_eq!(pairs, vec![("a", Some("b")), ("b", Some("c")), ("c", None)]);
    }

    /// Every prefix length up to a handful of items forms a well-formed chain.
    #[test]
    fn pairs_always_form_a_chain() {
        let ids = ["a", "b", "c", "d", "e", "f", "g"];
        for len in 0..=ids.len() {
            let items = &ids[..len];
            let pairs = pair_all(items.iter().copied());
            assert_chain(items, &pairs);
            let firsts: Vec<&str> = pairs.iter().map(|(cur, _)| *cur).collect();
            assert_eq!(firsts, items);
        }
    }
}
