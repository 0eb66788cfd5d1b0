use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;
use log::info;

use rs_wordgen_core::checkpoint::CheckpointStore;
use rs_wordgen_core::io::list_corpora;
use rs_wordgen_core::session::{MAX_EPOCH, Session, SessionConfig, validate_diversity};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train on a text and generate new text from it", long_about = None)]
struct Cli {
    /// Corpus file; defaults to the first `.txt` file of the texts folder
    #[arg(long, value_name = "PATH")]
    corpus: Option<PathBuf>,

    /// Folder searched for a corpus when none is given
    #[arg(long, value_name = "PATH", default_value = "texts")]
    texts: String,

    /// Folder holding the checkpoints
    #[arg(long, value_name = "PATH", default_value = "weights")]
    weights: PathBuf,

    #[arg(long, default_value_t = MAX_EPOCH)]
    epochs: usize,

    /// Seed position in the corpus (random if missing)
    #[arg(long)]
    seed: Option<usize>,

    /// Sampling temperature; 0.2 to 1.5 reads best
    #[arg(long, default_value_t = 0.5)]
    diversity: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // Pick the corpus: explicit file, or the first text of the folder
    let corpus = match cli.corpus {
        Some(path) => path,
        None => list_corpora(&cli.texts)?
            .into_iter()
            .next()
            .ok_or_else(|| format!("Please place a text file into the {} folder", cli.texts))?,
    };
    info!("Using corpus {}", corpus.display());

    // Checkpoints are looked up by corpus fingerprint and epoch count,
    // training only happens when none matches
    let store = CheckpointStore::open(&cli.weights)?;
    let config = SessionConfig { max_epoch: cli.epochs, ..SessionConfig::default() };
    let session = Session::open(&corpus, &store, config)?;

    println!("File:\t\t\t{}", corpus.display());
    println!("Words read:\t\t{}", session.corpus().tokens().len());
    println!("File hash:\t\t{}", session.corpus().fingerprint());
    println!("Unique words count:\t{}", session.vectorization().vocabulary_size());
    println!("Text samples count:\t{}", session.vectorization().sample_count());

    let range = session
        .seed_range()
        .ok_or("The text is too short to generate from")?;
    let seed = match cli.seed {
        Some(seed) => seed,
        None => {
            let seed = session.random_seed(&mut rand::rng()).ok_or("No seed available")?;
            info!("Picked random seed {seed}");
            seed
        }
    };
    println!("Seed:\t\t\t{} (valid {}..={})", seed, range.start(), range.end());

    // Anything > 0 is accepted, a warning is logged outside 0.2..=1.5
    let diversity = validate_diversity(cli.diversity)?;

    println!("\n{}\n", session.generate(seed, diversity)?);

    Ok(())
}
