use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spectrai_core::annotation::{BoxManager, read_annotation_file};
use spectrai_core::consts::PROJECT_FILE;
use spectrai_core::download::ModelDownloader;
use spectrai_core::inference::yolo::YoloConfig;
use spectrai_core::project::{
    AnnotationSession, ApplyOutcome, ImageCatalog, ModelEntry, ProjectConfig, SaveOutcome,
};
use spectrai_core::render::save_preview;
use spectrai_core::{ImageSize, PredictorManager};

#[derive(Parser)]
#[command(name = "spectrai")]
#[command(about = "Spectrum annotation tool with YOLO-assisted labeling")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a project in an existing folder
    Init {
        #[arg(help = "Project root")]
        root: PathBuf,
        #[arg(long, default_value = "images", help = "Image folder, relative to the root")]
        images: PathBuf,
        #[arg(long, default_value = "labels", help = "Annotation folder, relative to the root")]
        annotations: PathBuf,
    },
    /// Show images and annotation counts
    Info {
        #[arg(help = "Project root")]
        root: PathBuf,
    },
    /// Run a detector and save its boxes
    Predict {
        #[arg(help = "Project root")]
        root: PathBuf,
        #[arg(long, help = "ONNX model, the first registered model when omitted")]
        model: Option<PathBuf>,
        #[arg(long, help = "dataset.yaml of the model")]
        labels: Option<PathBuf>,
        #[arg(long, default_value = "0", conflicts_with = "all", help = "Image index")]
        index: usize,
        #[arg(long, help = "Predict every image")]
        all: bool,
        #[arg(long, help = "Minimum confidence, the project setting when omitted")]
        confidence: Option<f32>,
    },
    /// Draw the boxes of one image into a new file
    Render {
        #[arg(help = "Project root")]
        root: PathBuf,
        #[arg(long, default_value = "0", help = "Image index")]
        index: usize,
        #[arg(short, long, help = "Output image")]
        output: PathBuf,
    },
    /// Download the default models into a folder or project
    Download {
        #[arg(help = "Destination folder")]
        dest: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Command::Init {
            root,
            images,
            annotations,
        } => init(&root, images, annotations),
        Command::Info { root } => show_info(&root),
        Command::Predict {
            root,
            model,
            labels,
            index,
            all,
            confidence,
        } => predict(&root, model, labels, index, all, confidence),
        Command::Render {
            root,
            index,
            output,
        } => render(&root, index, &output),
        Command::Download { dest } => download(&dest),
    }
}

fn init(root: &Path, images: PathBuf, annotations: PathBuf) -> Result<(), Box<dyn Error>> {
    let session = AnnotationSession::create(root, images, annotations)?;
    println!(
        "Created project at {} with {} images",
        root.display(),
        session.catalog().len()
    );
    Ok(())
}

/// Reads the project without loading a session, so nothing is rewritten.
fn open_catalog(root: &Path) -> Result<(ProjectConfig, ImageCatalog), Box<dyn Error>> {
    let config = ProjectConfig::load(root)?;
    let catalog = ImageCatalog::scan(config.images_dir(root), config.annotations_dir(root))?;
    Ok((config, catalog))
}

fn show_info(root: &Path) -> Result<(), Box<dyn Error>> {
    let (config, catalog) = open_catalog(root)?;
    println!("Project: {}", root.display());
    println!("Images: {}", catalog.len());
    for entry in &config.model_paths {
        println!("Model: {} ({})", entry.name, entry.path.display());
    }

    for (idx, image) in catalog.images().iter().enumerate() {
        let name = image.file_name().unwrap_or_default().to_string_lossy();
        let (width, height) = match image::image_dimensions(image) {
            Ok(dims) => dims,
            Err(err) => {
                println!("{idx:>4}  {name}  unreadable: {err}");
                continue;
            }
        };
        match read_annotation_file(catalog.annotation_path(image), ImageSize::new(width, height)) {
            Ok(records) => println!("{idx:>4}  {name}  {} boxes", records.len()),
            Err(err) => println!("{idx:>4}  {name}  {err}"),
        }
    }
    Ok(())
}

fn predict(
    root: &Path,
    model: Option<PathBuf>,
    labels: Option<PathBuf>,
    index: usize,
    all: bool,
    confidence: Option<f32>,
) -> Result<(), Box<dyn Error>> {
    let mut session = AnnotationSession::open(root)?;
    if !all {
        session.catalog().check_index(index)?;
    }

    let entry = match model {
        Some(path) => ModelEntry {
            name: path.display().to_string(),
            path,
            labels: None,
        },
        None => session
            .config()
            .model_paths
            .first()
            .cloned()
            .ok_or("no --model given and the project has no registered models")?,
    };
    let labels_path = labels.unwrap_or_else(|| entry.labels_path());
    let min_confidence = confidence.unwrap_or(session.config().settings.min_confidence);

    let mut predictor =
        PredictorManager::from_onnx(&entry.path, &labels_path, YoloConfig::default())
            .inspect_err(|err| {
                if err.is_model_error() {
                    warn!("Model unavailable, nothing was annotated: {}", err);
                }
            })?
            .with_min_confidence(min_confidence);
    info!("Using model {} at confidence {}", entry.name, min_confidence);

    let indices = if all {
        0..session.catalog().len()
    } else {
        index..index + 1
    };

    for idx in indices {
        session.go_to(idx)?;
        let name = session
            .current_image_path()
            .map(|path| path.display().to_string())
            .unwrap_or_default();

        match session.predict_current(&mut predictor)? {
            ApplyOutcome::Applied { added } => println!("{name}: {added} boxes predicted"),
            ApplyOutcome::Stale | ApplyOutcome::NoImage => println!("{name}: skipped"),
        }
        if let SaveOutcome::Written { path, boxes } = session.save_current()? {
            info!("Wrote {} boxes to {}", boxes, path.display());
        }
    }

    for issue in session.load_issues() {
        warn!("{}: {}", issue.image.display(), issue.message);
    }
    Ok(())
}

fn render(root: &Path, index: usize, output: &Path) -> Result<(), Box<dyn Error>> {
    let (_, mut catalog) = open_catalog(root)?;
    catalog.check_index(index)?;
    catalog.go_to(index);
    let image_path = catalog.current().ok_or("project has no images")?;

    let image = image::open(image_path)?;
    let size = ImageSize::new(image.width(), image.height());
    let records = read_annotation_file(catalog.annotation_path(image_path), size)?;

    let mut boxes = BoxManager::new();
    boxes.from_list(&records)?;
    save_preview(&image, &boxes.get_all_boxes(), output)?;

    println!(
        "Rendered {} boxes of {} to {}",
        boxes.len(),
        image_path.display(),
        output.display()
    );
    Ok(())
}

fn download(dest: &Path) -> Result<(), Box<dyn Error>> {
    let models = ModelDownloader::default().download_all(dest)?;
    for model in &models {
        println!("{} -> {}", model.name, model.model_path.display());
    }

    // Register the models when the destination is a project
    if let Ok(mut config) = ProjectConfig::load(dest) {
        for model in &models {
            config.register_model(ModelEntry::from(model));
        }
        config.save(dest)?;
        println!(
            "Registered {} models in {}",
            models.len(),
            dest.join(PROJECT_FILE).display()
        );
    }
    Ok(())
}
