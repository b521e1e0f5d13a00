use std::path::{Path, PathBuf};
use std::sync::Arc;

use picture_ai_backend_core::config::{load_app_config, AppConfig};
use picture_ai_backend_core::db::tasks::TaskStore;
use picture_ai_backend_core::default_app_root;
use picture_ai_backend_core::remote::{
    ImageSize, OutpaintingParameters, OutpaintingRequest, TaskRequest, TextToImageRequest,
};
use picture_ai_backend_core::storage::{LocalObjectStorage, UploadPipeline, UploadVariant};
use picture_ai_backend_core::tasks::schedule::{thread_sleeper, wait_for_terminal};
use picture_ai_backend_core::tasks::TaskOrchestrator;
use picture_ai_backend_core::upload::FileUpload;
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> CliResult<()> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(command) = cli_args.first().map(String::as_str) else {
        print_usage();
        return Ok(());
    };
    let rest = cli_args[1..].to_vec();
    if rest
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }

    match command {
        "outpaint" => run_outpaint_cli(parse_outpaint_cli_args(rest.as_slice())?),
        "text-to-image" => run_text_to_image_cli(parse_text_to_image_cli_args(rest.as_slice())?),
        "task-status" => run_task_status_cli(parse_task_status_cli_args(rest.as_slice())?),
        "poll-open" => run_poll_open_cli(parse_poll_open_cli_args(rest.as_slice())?),
        "upload" => run_upload_cli(parse_upload_cli_args(rest.as_slice())?),
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        unknown => Err(std::io::Error::other(format!(
            "Unknown command: {unknown}\n\nUse --help for usage."
        ))
        .into()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Default)]
struct CommonCliArgs {
    app_root: Option<PathBuf>,
    settings_path: Option<String>,
}

impl CommonCliArgs {
    /// Consumes a shared flag at `args[i]`, returning how many items it used.
    fn take(&mut self, args: &[String], i: usize) -> CliResult<Option<usize>> {
        match args[i].as_str() {
            "--app-root" => {
                self.app_root = Some(PathBuf::from(value_after(args, i)?));
                Ok(Some(2))
            }
            "--settings" => {
                self.settings_path = Some(value_after(args, i)?);
                Ok(Some(2))
            }
            _ => Ok(None),
        }
    }

    fn load_config(&self) -> CliResult<AppConfig> {
        let app_root = self.app_root.clone().unwrap_or_else(default_app_root);
        Ok(load_app_config(
            app_root.as_path(),
            self.settings_path.as_deref(),
        )?)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OutpaintCliArgs {
    common: CommonCliArgs,
    image_url: String,
    model: Option<String>,
    parameters: OutpaintingParameters,
    wait: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct TextToImageCliArgs {
    common: CommonCliArgs,
    prompt: String,
    negative_prompt: Option<String>,
    size: Option<ImageSize>,
    image_count: Option<u8>,
    model: Option<String>,
    wait: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct TaskStatusCliArgs {
    common: CommonCliArgs,
    task_id: String,
}

#[derive(Debug, Clone, PartialEq)]
struct PollOpenCliArgs {
    common: CommonCliArgs,
    wait: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct UploadCliArgs {
    common: CommonCliArgs,
    variant: UploadVariant,
    file: Option<PathBuf>,
    url: Option<String>,
    prefix: String,
}

fn value_after(args: &[String], idx: usize) -> CliResult<String> {
    let Some(value) = args.get(idx + 1) else {
        return Err(std::io::Error::other(format!("Missing value for {}", args[idx])).into());
    };
    Ok(value.clone())
}

fn parse_number<T>(flag: &str, raw: &str) -> CliResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| std::io::Error::other(format!("Invalid value for {flag}: {e}")).into())
}

fn unknown_argument(flag: &str) -> Box<dyn std::error::Error> {
    std::io::Error::other(format!("Unknown argument: {flag}\n\nUse --help for usage.")).into()
}

fn required(value: Option<String>, flag: &str) -> CliResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other(format!("Missing required {flag}")).into())
}

fn parse_outpaint_cli_args(args: &[String]) -> CliResult<OutpaintCliArgs> {
    let mut common = CommonCliArgs::default();
    let mut image_url = None::<String>;
    let mut model = None::<String>;
    let mut parameters = OutpaintingParameters::default();
    let mut wait = false;
    let mut i = 0usize;
    while i < args.len() {
        if let Some(used) = common.take(args, i)? {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        let needs_value = |idx: usize| value_after(args, idx);

        match flag {
            "--image-url" => image_url = Some(needs_value(i)?),
            "--model" => model = Some(needs_value(i)?),
            "--angle" => parameters.angle = Some(parse_number(flag, needs_value(i)?.as_str())?),
            "--output-ratio" => parameters.output_ratio = Some(needs_value(i)?),
            "--x-scale" => parameters.x_scale = Some(parse_number(flag, needs_value(i)?.as_str())?),
            "--y-scale" => parameters.y_scale = Some(parse_number(flag, needs_value(i)?.as_str())?),
            "--best-quality" => {
                parameters.best_quality = Some(true);
                i += 1;
                continue;
            }
            "--watermark" => {
                parameters.add_watermark = true;
                i += 1;
                continue;
            }
            "--wait" => {
                wait = true;
                i += 1;
                continue;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
        i += 2;
    }

    Ok(OutpaintCliArgs {
        common,
        image_url: required(image_url, "--image-url")?,
        model,
        parameters,
        wait,
    })
}

fn parse_text_to_image_cli_args(args: &[String]) -> CliResult<TextToImageCliArgs> {
    let mut common = CommonCliArgs::default();
    let mut prompt = None::<String>;
    let mut negative_prompt = None::<String>;
    let mut size = None::<ImageSize>;
    let mut image_count = None::<u8>;
    let mut model = None::<String>;
    let mut wait = false;
    let mut i = 0usize;
    while i < args.len() {
        if let Some(used) = common.take(args, i)? {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        let needs_value = |idx: usize| value_after(args, idx);

        match flag {
            "--prompt" => prompt = Some(needs_value(i)?),
            "--negative-prompt" => negative_prompt = Some(needs_value(i)?),
            "--size" => size = Some(needs_value(i)?.parse::<ImageSize>()?),
            "--n" => image_count = Some(parse_number(flag, needs_value(i)?.as_str())?),
            "--model" => model = Some(needs_value(i)?),
            "--wait" => {
                wait = true;
                i += 1;
                continue;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
        i += 2;
    }

    Ok(TextToImageCliArgs {
        common,
        prompt: required(prompt, "--prompt")?,
        negative_prompt,
        size,
        image_count,
        model,
        wait,
    })
}

fn parse_task_status_cli_args(args: &[String]) -> CliResult<TaskStatusCliArgs> {
    let mut common = CommonCliArgs::default();
    let mut task_id = None::<String>;
    let mut i = 0usize;
    while i < args.len() {
        if let Some(used) = common.take(args, i)? {
            i += used;
            continue;
        }
        match args[i].as_str() {
            "--task-id" => {
                task_id = Some(value_after(args, i)?);
                i += 2;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }
    Ok(TaskStatusCliArgs {
        common,
        task_id: required(task_id, "--task-id")?,
    })
}

fn parse_poll_open_cli_args(args: &[String]) -> CliResult<PollOpenCliArgs> {
    let mut common = CommonCliArgs::default();
    let mut wait = false;
    let mut i = 0usize;
    while i < args.len() {
        if let Some(used) = common.take(args, i)? {
            i += used;
            continue;
        }
        match args[i].as_str() {
            "--wait" => {
                wait = true;
                i += 1;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }
    Ok(PollOpenCliArgs { common, wait })
}

fn parse_upload_cli_args(args: &[String]) -> CliResult<UploadCliArgs> {
    let mut common = CommonCliArgs::default();
    let mut variant = None::<String>;
    let mut file = None::<PathBuf>;
    let mut url = None::<String>;
    let mut prefix = String::from("public");
    let mut i = 0usize;
    while i < args.len() {
        if let Some(used) = common.take(args, i)? {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        match flag {
            "--variant" => variant = Some(value_after(args, i)?),
            "--file" => file = Some(PathBuf::from(value_after(args, i)?)),
            "--url" => url = Some(value_after(args, i)?),
            "--prefix" => prefix = value_after(args, i)?,
            unknown => return Err(unknown_argument(unknown)),
        }
        i += 2;
    }

    let variant = match variant.as_deref() {
        Some(raw) => UploadVariant::parse(raw).ok_or_else(|| {
            std::io::Error::other(format!(
                "Invalid value for --variant: {raw} (expected picture, avatar or url)"
            ))
        })?,
        None if url.is_some() => UploadVariant::Url,
        None => UploadVariant::Picture,
    };
    match (variant, file.is_some(), url.is_some()) {
        (UploadVariant::Url, _, false) => {
            return Err(std::io::Error::other("Missing required --url for url uploads").into())
        }
        (UploadVariant::Picture | UploadVariant::Avatar, false, _) => {
            return Err(std::io::Error::other("Missing required --file").into())
        }
        _ => {}
    }
    Ok(UploadCliArgs {
        common,
        variant,
        file,
        url,
        prefix,
    })
}

fn open_task_store(config: &AppConfig) -> CliResult<Arc<TaskStore>> {
    let store = TaskStore::new(config.db.task_db_path.as_path());
    store.initialize()?;
    Ok(Arc::new(store))
}

fn submit_and_report(
    common: &CommonCliArgs,
    request: TaskRequest,
    wait: bool,
) -> CliResult<()> {
    let config = common.load_config()?;
    let client = config.ai.build_client()?;
    let orchestrator = TaskOrchestrator::new(client, open_task_store(&config)?);
    let handle = orchestrator.submit(&request)?;
    let poll = if wait {
        Some(wait_for_terminal(
            &orchestrator,
            &handle,
            &config.polling,
            thread_sleeper,
        )?)
    } else {
        None
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "task": handle,
            "poll": poll
        }))?
    );
    Ok(())
}

fn run_outpaint_cli(args: OutpaintCliArgs) -> CliResult<()> {
    let mut request = OutpaintingRequest::new(args.image_url).with_parameters(args.parameters);
    if let Some(model) = args.model {
        request = request.with_model(model);
    }
    submit_and_report(&args.common, request.into(), args.wait)
}

fn run_text_to_image_cli(args: TextToImageCliArgs) -> CliResult<()> {
    let mut request = TextToImageRequest::new(args.prompt);
    if let Some(negative_prompt) = args.negative_prompt {
        request = request.with_negative_prompt(negative_prompt);
    }
    if let Some(size) = args.size {
        request = request.with_size(size);
    }
    if let Some(n) = args.image_count {
        request = request.with_image_count(n);
    }
    if let Some(model) = args.model {
        request = request.with_model(model);
    }
    submit_and_report(&args.common, request.into(), args.wait)
}

fn run_task_status_cli(args: TaskStatusCliArgs) -> CliResult<()> {
    let config = args.common.load_config()?;
    let client = config.ai.build_client()?;
    let report = client.get_task_status(args.task_id.as_str())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "ok": true, "report": report }))?
    );
    Ok(())
}

fn run_poll_open_cli(args: PollOpenCliArgs) -> CliResult<()> {
    let config = args.common.load_config()?;
    let store = open_task_store(&config)?;
    let open = store.list_open_tasks()?;
    let orchestrator = TaskOrchestrator::new(config.ai.build_client()?, store);

    let mut results = Vec::with_capacity(open.len());
    for record in open {
        let handle = record.to_handle()?;
        orchestrator.resume(&handle);
        let outcome = if args.wait {
            wait_for_terminal(&orchestrator, &handle, &config.polling, thread_sleeper)
                .map_err(|e| e.to_string())
        } else {
            orchestrator.poll(&handle).map_err(|e| e.to_string())
        };
        match outcome {
            Ok(poll) => results.push(json!({ "task_id": handle.task_id(), "poll": poll })),
            Err(error) => {
                warn!(task_id = %handle.task_id(), error = %error, "open task poll failed");
                results.push(json!({ "task_id": handle.task_id(), "error": error }));
            }
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "ok": true, "tasks": results }))?
    );
    Ok(())
}

fn run_upload_cli(args: UploadCliArgs) -> CliResult<()> {
    let config = args.common.load_config()?;
    let pipeline = UploadPipeline::new(
        config.ai.transport()?,
        LocalObjectStorage::new(
            config.storage.root.as_path(),
            config.storage.public_base_url.as_str(),
        ),
        config.upload.clone(),
    );
    let stored = match (&args.file, &args.url) {
        (Some(path), _) if args.variant != UploadVariant::Url => {
            let upload = read_file_upload(path.as_path())?;
            pipeline.upload_file(args.variant, &upload, args.prefix.as_str())?
        }
        (_, Some(url)) => pipeline.upload_url(url.as_str(), args.prefix.as_str())?,
        _ => return Err(std::io::Error::other("Nothing to upload").into()),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "ok": true, "picture": stored }))?
    );
    Ok(())
}

fn read_file_upload(path: &Path) -> CliResult<FileUpload> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(FileUpload::new(name, bytes))
}

fn print_usage() {
    eprintln!(
        concat!(
            "Usage:\n",
            "  picture-ai-backend-core outpaint --image-url URL [--x-scale F] [--y-scale F] ",
            "[--angle DEG] [--output-ratio R] [--best-quality] [--watermark] [--model M] [--wait]\n",
            "  picture-ai-backend-core text-to-image --prompt TEXT [--negative-prompt TEXT] ",
            "[--size W*H] [--n COUNT] [--model M] [--wait]\n",
            "  picture-ai-backend-core task-status --task-id ID\n",
            "  picture-ai-backend-core poll-open [--wait]\n",
            "  picture-ai-backend-core upload [--variant picture|avatar|url] (--file PATH | --url URL) ",
            "[--prefix PREFIX]\n\n",
            "Shared flags:\n",
            "  --app-root PATH   root for relative paths (default: PICTURE_AI_APP_ROOT or cwd)\n",
            "  --settings PATH   settings TOML (default: config/picture-ai.settings.toml)\n\n",
            "The API key is read from PICTURE_AI_API_KEY or DASHSCOPE_API_KEY.\n"
        )
    );
}
