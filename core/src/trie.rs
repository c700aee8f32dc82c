use std::collections::BTreeMap;

const ROOT: usize = 0;

#[derive(Debug, Default, Clone)]
struct TrieNode {
    children: BTreeMap<char, usize>,
    /// Display form of the entry whose normalized key ends at this node.
    word: Option<String>,
}

/// Prefix tree stored as an arena; node 0 is the root and edges only point downward.
#[derive(Debug, Clone)]
pub struct TrieStore {
    nodes: Vec<TrieNode>,
}

impl Default for TrieStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieStore {
    pub fn new() -> Self {
        Self { nodes: vec![TrieNode::default()] }
    }

    /// Insert `word` under its already-normalized `key`.
    pub fn insert(&mut self, key: &str, word: &str) {
        let mut cur = ROOT;
        for ch in key.chars() {
            cur = match self.nodes[cur].children.get(&ch) {
                Some(&next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[cur].children.insert(ch, next);
                    next
                }
            };
        }
        self.nodes[cur].word = Some(word.to_string());
    }

    /// Words whose key starts with `prefix`, depth-first, at most `max`.
    pub fn collect_prefix(&self, prefix: &str, max: usize) -> Vec<String> {
        let mut out = Vec::new();
        if max == 0 {
            return out;
        }
        let mut cur = ROOT;
        for ch in prefix.chars() {
            match self.nodes[cur].children.get(&ch) {
                Some(&next) => cur = next,
                None => return out,
            }
        }
        self.collect(cur, &mut out, max);
        out
    }

    fn collect(&self, node: usize, out: &mut Vec<String>, max: usize) {
        if out.len() >= max {
            return;
        }
        let n = &self.nodes[node];
        if let Some(w) = &n.word {
            out.push(w.clone());
        }
        for &child in n.children.values() {
            if out.len() >= max {
                break;
            }
            self.collect(child, out, max);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
