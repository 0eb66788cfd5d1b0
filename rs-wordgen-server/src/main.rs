use std::path::PathBuf;
use std::time::{Duration, Instant};

use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::middleware::Logger;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, web};
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use serde::{Deserialize, Serialize};

use rs_wordgen_core::checkpoint::CheckpointStore;
use rs_wordgen_core::model::SequenceModel;
use rs_wordgen_core::model::generator::{GenerateError, OUTPUT_LENGTH};
use rs_wordgen_core::session::{MAX_EPOCH, Session, SessionConfig, validate_diversity};

/// Command line / environment configuration
#[derive(Parser, Debug)]
#[command(author, version, about = "Word generation HTTP server", long_about = None)]
struct Cli {
	/// Corpus text file to train on
	#[arg(long, env = "WORDGEN_CORPUS", value_name = "PATH")]
	corpus: PathBuf,

	/// Folder holding the checkpoints
	#[arg(long, env = "WORDGEN_WEIGHTS", value_name = "PATH", default_value = "weights")]
	weights: PathBuf,

	/// Training epochs (a checkpoint of this epoch is reused)
	#[arg(long, env = "WORDGEN_EPOCHS", default_value_t = MAX_EPOCH)]
	epochs: usize,

	/// Tokens generated after the seed window
	#[arg(long, env = "WORDGEN_LENGTH", default_value_t = OUTPUT_LENGTH)]
	length: usize,

	#[arg(long, env = "WORDGEN_HOST", default_value = "127.0.0.1")]
	host: String,

	#[arg(long, env = "WORDGEN_PORT", default_value_t = 5000)]
	port: u16,

	/// Time budget of one generation request, in milliseconds
	#[arg(long, env = "WORDGEN_DEADLINE_MS", default_value_t = 10_000)]
	deadline_ms: u64,
}

/// Query parameters for the `/v1/generate` endpoint
#[derive(Deserialize)]
struct GenerateParams {
	seed: Option<usize>, // random valid seed if missing
	diversity: Option<f64>,
}

/// Body of the `/v1/corpus` endpoint
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct CorpusInfo {
	name: String,
	fingerprint: String,
	tokens: usize,
	vocabulary_size: usize,
	samples: usize,
	window_length: usize,
	epochs: usize,
	seed_range: Option<(usize, usize)>,
	checkpoint: Option<String>,
}

struct SharedData {
	session: Session,
	deadline: Duration,
}

fn status_for(error: &GenerateError) -> StatusCode {
	match error {
		GenerateError::SeedOutOfRange { .. } | GenerateError::Sampling(_) | GenerateError::UnknownToken(_) => {
			StatusCode::BAD_REQUEST
		}
		GenerateError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
		GenerateError::Model(_) | GenerateError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

/// HTTP GET endpoint `/v1/corpus`
///
/// Describes the loaded corpus and model.
#[get("/v1/corpus")]
async fn get_corpus(data: web::Data<SharedData>) -> impl Responder {
	let session = &data.session;
	let vectorization = session.vectorization();

	web::Json(CorpusInfo {
		name: session.corpus().name().to_owned(),
		fingerprint: session.corpus().fingerprint().to_owned(),
		tokens: session.corpus().tokens().len(),
		vocabulary_size: vectorization.vocabulary_size(),
		samples: vectorization.sample_count(),
		window_length: vectorization.window_length(),
		epochs: session.model().epochs_trained(),
		seed_range: session.seed_range().map(|range| (*range.start(), *range.end())),
		checkpoint: session.checkpoint().map(|path| path.display().to_string()),
	})
}

/// HTTP GET endpoint `/v1/generate`
///
/// Generates text from a seed position of the corpus.
/// The session is only read, so requests run concurrently on the blocking
/// pool; a request running past the deadline is cancelled between steps.
#[get("/v1/generate")]
async fn get_generated(data: web::Data<SharedData>, query: web::Query<GenerateParams>) -> impl Responder {
	let diversity = match validate_diversity(query.diversity.unwrap_or(1.0)) {
		Ok(d) => d,
		Err(e) => return HttpResponse::BadRequest().body(e.to_string()),
	};

	let seed = match query.seed.or_else(|| data.session.random_seed(&mut rand::rng())) {
		Some(s) => s,
		None => return HttpResponse::BadRequest().body("Corpus too short to pick a seed"),
	};

	let shared = data.clone();
	let result = web::block(move || {
		let deadline = Instant::now() + shared.deadline;
		let session = &shared.session;
		session.generator()?.generate_until(
			session.corpus().tokens(),
			seed,
			diversity,
			&mut rand::rng(),
			|| Instant::now() >= deadline,
		)
	})
	.await;

	match result {
		Ok(Ok(text)) => HttpResponse::Ok().body(text),
		Ok(Err(e)) => {
			let status = status_for(&e);
			if status.is_server_error() {
				error!("Generation failed: {e}");
			}
			HttpResponse::build(status).body(e.to_string())
		}
		Err(e) => {
			error!("Generation worker failed: {e}");
			HttpResponse::InternalServerError().body("Generation worker failed")
		}
	}
}

fn routes(cfg: &mut web::ServiceConfig) {
	cfg.service(get_corpus).service(get_generated);
}

/// Main entry point for the server.
///
/// Loads or trains the model of the corpus, then serves it read-only.
#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
	let cli = Cli::parse();

	let store = CheckpointStore::open(&cli.weights)?;
	let config = SessionConfig {
		max_epoch: cli.epochs,
		output_length: cli.length,
		..SessionConfig::default()
	};
	let session = Session::open(&cli.corpus, &store, config)?;

	let shared_data = web::Data::new(SharedData {
		session,
		deadline: Duration::from_millis(cli.deadline_ms),
	});

	info!("Listening on {}:{}", cli.host, cli.port);
	HttpServer::new(move || {
		App::new()
			.wrap(Logger::default())
			.wrap(Cors::default().allow_any_origin().allowed_methods(vec!["GET"]).max_age(3600))
			.app_data(shared_data.clone())
			.configure(routes)
	})
		.bind((cli.host.as_str(), cli.port))?
		.run()
		.await?;

	Ok(())
}
