use find_module::data::{pad_batch, PretrainingDataset};
use find_module::FindModuleError;
use std::collections::HashSet;
use std::convert::TryFrom;

const TOKEN_LENGTHS: [usize; 8] = [10, 6, 12, 13, 19, 26, 17, 19];
const QUERY_LENGTHS: [usize; 8] = [2, 3, 1, 5, 4, 3, 2, 1];

fn length_dataset() -> anyhow::Result<PretrainingDataset> {
    let tokens = TOKEN_LENGTHS
        .iter()
        .enumerate()
        .map(|(row, &length)| vec![row as i64 + 1; length])
        .collect();
    let queries = QUERY_LENGTHS
        .iter()
        .enumerate()
        .map(|(row, &length)| vec![row as i64 + 1; length])
        .collect();
    let labels = TOKEN_LENGTHS.iter().map(|&length| vec![0f32; length]).collect();
    Ok(PretrainingDataset::new(tokens, queries, labels, 0)?)
}

#[test]
fn padded_rows_recover_their_original_values() -> anyhow::Result<()> {
    let rows = vec![vec![4i64, 8, 15], vec![16], vec![23, 42, 7, 1, 9]];

    let batch = pad_batch(&rows, -1);
    assert_eq!(batch.size(), vec![3, 5]);

    let padded = Vec::<Vec<i64>>::try_from(&batch)?;
    for (padded_row, row) in padded.iter().zip(rows.iter()) {
        assert_eq!(padded_row.len(), 5);
        assert_eq!(&padded_row[..row.len()], row.as_slice());
        assert!(padded_row[row.len()..].iter().all(|&value| value == -1));
    }
    Ok(())
}

#[test]
fn pad_batch_keeps_the_element_type() -> anyhow::Result<()> {
    let batch = pad_batch(&[vec![0.5f32, 1.0], vec![1.0]], 0f32);

    assert_eq!(batch.kind(), tch::Kind::Float);
    assert_eq!(
        Vec::<Vec<f32>>::try_from(&batch)?,
        vec![vec![0.5, 1.0], vec![1.0, 0.0]]
    );
    Ok(())
}

#[test]
fn unshuffled_batches_are_length_bucketed() -> anyhow::Result<()> {
    let dataset = length_dataset()?;

    let batches: Vec<_> = dataset.make_batches(2, false, None)?.collect();
    let token_widths: Vec<i64> = batches.iter().map(|batch| batch.tokens.size()[1]).collect();
    let query_widths: Vec<i64> = batches.iter().map(|batch| batch.queries.size()[1]).collect();

    assert_eq!(token_widths, vec![10, 13, 19, 26]);
    assert_eq!(query_widths, vec![3, 5, 2, 4]);
    for batch in batches.iter() {
        assert_eq!(batch.tokens.size(), batch.labels.size());
        assert_eq!(batch.batch_size(), 2);
    }
    Ok(())
}

#[test]
fn unshuffled_order_is_stable_across_calls() -> anyhow::Result<()> {
    let dataset = length_dataset()?;

    let first = dataset.make_batches(3, false, None)?.plan().to_vec();
    let second = dataset.make_batches(3, false, None)?.plan().to_vec();

    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert_eq!(first[2].len(), 2);
    Ok(())
}

#[test]
fn seeded_shuffle_is_reproducible() -> anyhow::Result<()> {
    let dataset = length_dataset()?;

    let first: Vec<Vec<Vec<i64>>> = dataset
        .make_batches(2, true, Some(17))?
        .map(|batch| Vec::<Vec<i64>>::try_from(&batch.tokens))
        .collect::<Result<_, _>>()?;
    let second: Vec<Vec<Vec<i64>>> = dataset
        .make_batches(2, true, Some(17))?
        .map(|batch| Vec::<Vec<i64>>::try_from(&batch.tokens))
        .collect::<Result<_, _>>()?;

    assert_eq!(first, second);
    Ok(())
}

#[test]
fn every_example_is_batched_exactly_once() -> anyhow::Result<()> {
    let dataset = length_dataset()?;

    for seed in 0..5 {
        let batches = dataset.make_batches(3, true, Some(seed))?;
        let rows: Vec<usize> = batches.plan().iter().flatten().copied().collect();
        let unique: HashSet<usize> = rows.iter().copied().collect();
        assert_eq!(rows.len(), dataset.len());
        assert_eq!(unique.len(), dataset.len());
        assert_eq!(batches.len(), 3);
    }
    Ok(())
}

#[test]
fn shuffled_batches_pad_to_their_own_members() -> anyhow::Result<()> {
    let dataset = length_dataset()?;
    let batches = dataset.make_batches(2, true, Some(3))?;
    let plan = batches.plan().to_vec();

    for (indices, batch) in plan.iter().zip(batches) {
        let widest_tokens = indices.iter().map(|&row| TOKEN_LENGTHS[row]).max();
        let widest_query = indices.iter().map(|&row| QUERY_LENGTHS[row]).max();
        assert_eq!(Some(batch.tokens.size()[1] as usize), widest_tokens);
        assert_eq!(Some(batch.queries.size()[1] as usize), widest_query);
    }
    Ok(())
}

#[test]
fn mismatched_containers_are_rejected() {
    let row_count = PretrainingDataset::new(
        vec![vec![1, 2], vec![3]],
        vec![vec![1]],
        vec![vec![0., 0.], vec![0.]],
        0,
    );
    assert!(matches!(row_count, Err(FindModuleError::ValueError(_))));

    let label_length = PretrainingDataset::new(
        vec![vec![1, 2], vec![3]],
        vec![vec![1], vec![3]],
        vec![vec![0., 0.], vec![0., 1.]],
        0,
    );
    match label_length {
        Err(FindModuleError::ValueError(message)) => assert!(message.contains("row 1")),
        _ => panic!("expected a ValueError naming row 1"),
    }
}
