// Copyright 2024 The Find Module Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::data::PretrainingDataset;
use crate::FindModuleError;
use rand::Rng;

/// Sequences of this many tokens or fewer are skipped by `build_pretraining_triples`.
pub const MIN_SEQUENCE_LENGTH: usize = 3;
/// Longest query sampled by `build_pretraining_triples`.
pub const MAX_QUERY_LENGTH: usize = 5;

/// Parallel (sequence, query, labels) rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PretrainingTriples {
    pub tokens: Vec<Vec<i64>>,
    pub queries: Vec<Vec<i64>>,
    pub labels: Vec<Vec<f32>>,
}

impl PretrainingTriples {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn into_dataset(self, pad_id: i64) -> Result<PretrainingDataset, FindModuleError> {
        PretrainingDataset::new(self.tokens, self.queries, self.labels, pad_id)
    }
}

/// Builds self-supervised triples from unlabelled token sequences.
///
/// For every sequence longer than `MIN_SEQUENCE_LENGTH` tokens, a query length `n` is drawn in
/// `1..=min(len, MAX_QUERY_LENGTH)` and a start position `s` in `0..=len - n`. The query is
/// `seq[s..s + n]`, the sequence is framed as `[bos_id] + seq + [eos_id]` and the labels are
/// 1.0 on the query span and 0.0 elsewhere, including the two markers.
pub fn build_pretraining_triples<R: Rng + ?Sized>(
    token_seqs: &[Vec<i64>],
    bos_id: i64,
    eos_id: i64,
    rng: &mut R,
) -> PretrainingTriples {
    let mut triples = PretrainingTriples::default();
    for token_seq in token_seqs
        .iter()
        .filter(|token_seq| token_seq.len() > MIN_SEQUENCE_LENGTH)
    {
        let query_length = rng.gen_range(1..=token_seq.len().min(MAX_QUERY_LENGTH));
        let start = rng.gen_range(0..=token_seq.len() - query_length);
        let end = start + query_length;

        let mut tokens = Vec::with_capacity(token_seq.len() + 2);
        tokens.push(bos_id);
        tokens.extend_from_slice(token_seq);
        tokens.push(eos_id);

        let mut labels = vec![0f32; tokens.len()];
        labels[start + 1..end + 1].iter_mut().for_each(|label| *label = 1.0);

        triples.tokens.push(tokens);
        triples.queries.push(token_seq[start..end].to_vec());
        triples.labels.push(labels);
    }
    log::info!(
        "Built {} pre-training triples from {} sequences",
        triples.len(),
        token_seqs.len()
    );
    triples
}

/// Labels the first contiguous occurrence of `query` in `token_seq`, returning `None` when the
/// query is empty or does not occur.
pub fn label_query_span(token_seq: &[i64], query: &[i64]) -> Option<Vec<f32>> {
    if query.is_empty() || query.len() > token_seq.len() {
        return None;
    }
    let start = token_seq
        .windows(query.len())
        .position(|window| window == query)?;
    let mut labels = vec![0f32; token_seq.len()];
    labels[start..start + query.len()]
        .iter_mut()
        .for_each(|label| *label = 1.0);
    Some(labels)
}

/// Builds triples from sequences paired with known queries, labelling the first occurrence of
/// each query. Pairs whose query does not occur in its sequence are dropped.
pub fn build_labelled_triples(
    token_seqs: &[Vec<i64>],
    query_seqs: &[Vec<i64>],
) -> Result<PretrainingTriples, FindModuleError> {
    if token_seqs.len() != query_seqs.len() {
        return Err(FindModuleError::ValueError(format!(
            "token_seqs and query_seqs must have the same number of rows (dim 0), got {} and {}",
            token_seqs.len(),
            query_seqs.len()
        )));
    }
    let mut triples = PretrainingTriples::default();
    for (token_seq, query) in token_seqs.iter().zip(query_seqs.iter()) {
        if let Some(labels) = label_query_span(token_seq, query) {
            triples.tokens.push(token_seq.clone());
            triples.queries.push(query.clone());
            triples.labels.push(labels);
        }
    }
    if triples.len() < token_seqs.len() {
        log::warn!(
            "Dropped {} sequence / query pairs without an occurrence of the query",
            token_seqs.len() - triples.len()
        );
    }
    Ok(triples)
}

/// Quote characters tried in order by `extract_quoted_queries`.
pub const QUOTE_CHARACTERS: [char; 3] = ['"', '\'', '`'];

/// Returns the non-empty phrases enclosed in quotes in an explanation, without the quotes.
///
/// Double quotes are tried first, then single quotes, then backticks. Phrases are taken from
/// the first quote character with at least one match only. An unmatched trailing quote is
/// ignored, and an empty pair (`""`) is skipped so that its closing quote may open the next
/// phrase.
pub fn extract_quoted_queries(explanation: &str) -> Vec<String> {
    for quote in QUOTE_CHARACTERS {
        let phrases = quoted_phrases(explanation, quote);
        if !phrases.is_empty() {
            return phrases;
        }
    }
    Vec::new()
}

fn quoted_phrases(text: &str, quote: char) -> Vec<String> {
    let mut phrases = Vec::new();
    let mut remaining = text;
    while let Some(open) = remaining.find(quote) {
        let after_open = &remaining[open + quote.len_utf8()..];
        match after_open.find(quote) {
            Some(0) => remaining = after_open,
            Some(close) => {
                phrases.push(after_open[..close].to_string());
                remaining = &after_open[close + quote.len_utf8()..];
            }
            None => break,
        }
    }
    phrases
}

/// Gathers the quoted phrases of labelled explanations, each paired with the label of its
/// explanation. With a `label_filter`, explanations whose label is not listed are skipped.
pub fn collect_quoted_queries<T: Clone + PartialEq>(
    explanations: &[(String, T)],
    label_filter: Option<&[T]>,
) -> (Vec<String>, Vec<T>) {
    let mut queries = Vec::new();
    let mut labels = Vec::new();
    for (explanation, label) in explanations {
        if label_filter.map_or(true, |accepted| accepted.contains(label)) {
            for query in extract_quoted_queries(explanation) {
                queries.push(query);
                labels.push(label.clone());
            }
        }
    }
    log::info!(
        "Extracted {} quoted queries from {} explanations",
        queries.len(),
        explanations.len()
    );
    (queries, labels)
}
