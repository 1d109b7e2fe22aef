use find_module::data::{build_labelled_triples, build_pretraining_triples, PretrainingDataset};
use find_module::find::{FindModule, FindModuleConfig};
use find_module::pipelines::pretraining::{FindModulePretrainer, LabelledQueries};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tch::{nn, Device, Kind, Tensor};

const VOCAB_SIZE: i64 = 40;
const BOS_ID: i64 = 2;
const EOS_ID: i64 = 3;

fn build_model(vs: &nn::VarStore) -> anyhow::Result<FindModule> {
    let config = FindModuleConfig::new(8, 6, 10);
    let embedding_weights = Tensor::randn([VOCAB_SIZE, 8], (Kind::Float, Device::Cpu));
    Ok(FindModule::new(vs.root(), &config, &embedding_weights)?)
}

fn pretraining_dataset() -> anyhow::Result<PretrainingDataset> {
    let token_seqs = vec![
        vec![10, 11, 12, 13, 14, 15, 16],
        vec![17, 18, 19, 20],
        vec![21, 22, 23, 24, 25, 26, 27, 28, 29],
        vec![30, 31],
        vec![32, 33, 34, 35, 36],
    ];
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let triples = build_pretraining_triples(&token_seqs, BOS_ID, EOS_ID, &mut rng);
    assert_eq!(triples.len(), 4);
    Ok(triples.into_dataset(0)?)
}

fn labelled_queries() -> anyhow::Result<LabelledQueries> {
    Ok(LabelledQueries::new(
        &[vec![11, 12], vec![25], vec![33, 34, 35], vec![18]],
        &[1, 1, 0, 0],
        0,
    )?)
}

#[test]
fn training_epoch_reports_finite_losses() -> anyhow::Result<()> {
    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let find_module = build_model(&vs)?;
    let dataset = pretraining_dataset()?;
    let labelled_queries = labelled_queries()?;
    let mut pretrainer = FindModulePretrainer::new(&vs, 1e-3)?;

    let summary =
        pretrainer.train_epoch(&find_module, &dataset, Some(&labelled_queries), 3, Some(5))?;

    assert_eq!(summary.batch_count, 2);
    assert!(summary.loss.is_finite());
    assert!(summary.find_loss > 0.0);
    assert!(summary.sim_loss >= 0.0);
    assert!((summary.loss - (summary.find_loss + 0.5 * summary.sim_loss)).abs() < 1e-4);
    Ok(())
}

#[test]
fn training_never_updates_frozen_vectors() -> anyhow::Result<()> {
    tch::manual_seed(1);
    let vs = nn::VarStore::new(Device::Cpu);
    let find_module = build_model(&vs)?;
    let dataset = pretraining_dataset()?;
    let variables = vs.variables();
    let frozen_before = variables["embeddings.frozen_embeddings"].copy();
    let tuneable_before = variables["embeddings.tuneable_embeddings"].copy();

    let mut pretrainer = FindModulePretrainer::new(&vs, 1e-2)?;
    for epoch in 0..3 {
        pretrainer.train_epoch(&find_module, &dataset, Some(&labelled_queries()?), 2, Some(epoch))?;
    }

    let variables = vs.variables();
    assert!(variables["embeddings.frozen_embeddings"].equal(&frozen_before));
    assert!(!variables["embeddings.tuneable_embeddings"].equal(&tuneable_before));
    Ok(())
}

#[test]
fn padding_vector_stays_shared_across_tables() -> anyhow::Result<()> {
    tch::manual_seed(6);
    let vs = nn::VarStore::new(Device::Cpu);
    let find_module = build_model(&vs)?;
    let dataset = pretraining_dataset()?;
    let padding_before = vs.variables()["embeddings.tuneable_embeddings"].get(0).copy();

    let mut pretrainer = FindModulePretrainer::new(&vs, 1e-2)?;
    for epoch in 0..3 {
        pretrainer.train_epoch(&find_module, &dataset, Some(&labelled_queries()?), 2, Some(epoch))?;
    }

    let variables = vs.variables();
    let tuneable_padding = variables["embeddings.tuneable_embeddings"].get(0);
    let frozen_padding = variables["embeddings.frozen_embeddings"].get(0);
    assert!(tuneable_padding.equal(&frozen_padding));
    assert!(tuneable_padding.equal(&padding_before));
    Ok(())
}

#[test]
fn evaluation_is_reproducible_and_combines_losses() -> anyhow::Result<()> {
    tch::manual_seed(2);
    let vs = nn::VarStore::new(Device::Cpu);
    let find_module = build_model(&vs)?;
    let dataset = pretraining_dataset()?;
    let labelled_queries = labelled_queries()?;
    let pretrainer = FindModulePretrainer::new(&vs, 1e-3)?.with_gamma(2.0);

    let first = pretrainer.evaluate(&find_module, &dataset, Some(&labelled_queries), 2)?;
    let second = pretrainer.evaluate(&find_module, &dataset, Some(&labelled_queries), 2)?;

    assert_eq!(first, second);
    assert_eq!(first.batch_count, 2);
    assert!((0.0..=1.0).contains(&first.f1_score));
    assert!((first.loss - (first.find_loss + 2.0 * first.sim_loss)).abs() < 1e-4);
    Ok(())
}

#[test]
fn find_loss_evaluation_ignores_query_similarity() -> anyhow::Result<()> {
    tch::manual_seed(3);
    let vs = nn::VarStore::new(Device::Cpu);
    let find_module = build_model(&vs)?;
    let dataset = pretraining_dataset()?;
    let pretrainer = FindModulePretrainer::new(&vs, 1e-3)?;

    let evaluation = pretrainer.evaluate_find_loss(&find_module, &dataset, 4)?;

    assert_eq!(evaluation.batch_count, 1);
    assert_eq!(evaluation.sim_loss, 0.0);
    assert!((evaluation.loss - evaluation.find_loss).abs() < 1e-9);
    Ok(())
}

#[test]
fn labelled_triples_train_like_sampled_ones() -> anyhow::Result<()> {
    tch::manual_seed(4);
    let vs = nn::VarStore::new(Device::Cpu);
    let find_module = build_model(&vs)?;
    let triples = build_labelled_triples(
        &[vec![10, 11, 12, 13], vec![14, 15, 16], vec![17, 18]],
        &[vec![11, 12], vec![16], vec![19]],
    )?;
    assert_eq!(triples.len(), 2);
    let dataset = triples.into_dataset(0)?;

    let mut pretrainer = FindModulePretrainer::new(&vs, 1e-3)?.with_lower_bound(-5.0);
    let summary = pretrainer.train_epoch(&find_module, &dataset, None, 8, None)?;

    assert_eq!(summary.batch_count, 1);
    assert_eq!(summary.sim_loss, 0.0);
    Ok(())
}
