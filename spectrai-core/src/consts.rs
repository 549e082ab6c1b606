/// Number of values describing a box in a YOLO output row: center x, center y, width, height.
///
/// Class scores start right after these values in the model output tensor.
pub const CXYWH_OFFSET: usize = 4;

/// Minimum class score for a detection to be kept by the detector.
///
/// Ultralytics uses the same default for `predict`.
pub const PROBA_THRESHOLD: f32 = 0.25;

/// IoU above which the lower scoring of two same-class detections is suppressed.
pub const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Input side of the exported detection models.
pub const REQUIRED_WIDTH: u32 = 640;

/// Input side of the exported detection models.
pub const REQUIRED_HEIGHT: u32 = 640;

/// Number of color channels in the input image.
pub const INPUT_CHANNELS: usize = 3;

/// Batch size for model inference.
pub const BATCH_SIZE: usize = 1;

/// Normalized gray used for the letterbox padding of the model input (114/255).
pub const BACKGROUND_FILL_VALUE: f32 = 114.0 / 255.0;

/// Decimal places written for every normalized YOLO value.
pub const YOLO_PRECISION: usize = 6;

/// Slack allowed when checking that normalized YOLO values lie in `[0, 1]`.
pub const NORMALIZED_TOLERANCE: f32 = 1e-4;

/// Boxes drawn by hand must be strictly larger than this in both dimensions (image pixels).
pub const MIN_BOX_SIZE: f32 = 5.0;

/// Image files picked up by a project, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Extension of per-image annotation files.
pub const ANNOTATION_EXTENSION: &str = "txt";

/// Project file written at the root of every project.
pub const PROJECT_FILE: &str = "config.json";

/// Label set file of projects and downloaded models.
pub const DATASET_FILE: &str = "dataset.yaml";

/// Functional-group classes of the infrared models, in model index order.
pub const DEFAULT_LABELS: [&str; 12] = [
    "aromatics",
    "alcohols",
    "amines",
    "esters",
    "alkene",
    "carb. acids",
    "ketones",
    "phenol",
    "nitriles",
    "amides",
    "aldehydes",
    "alkyne",
];

/// Hugging Face base used to resolve model files.
pub const HF_BASE_URL: &str = "https://huggingface.co";

/// `(repo_id, filename)` of the default models.
pub const DEFAULT_MODEL_SOURCES: [(&str, &str); 2] = [
    (
        "UrielGC/spectrai-IR-YOLO-10FG",
        "spectrai_ultralytics_IR_10FG.onnx",
    ),
    (
        "UrielGC/spectrai-IR-YOLO-12FG",
        "spectrai_ultralytics_IR_12FG.onnx",
    ),
];

/// Timeout applied to every download request, in seconds.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 60;
