use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use ctxbridge_adapter::LoopbackAdapter;
use ctxbridge_protocol::{Function, Value};
use ctxbridge_proxy::{
    define_proxy, heartbeat_check, Handle, MethodError, Options, ProxyError, Target,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cmd::{parse_duration, SelftestArgs};
use crate::exit::{io_error, proxy_error, CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, table, yes_no, OutputFormat};

const FAILURE_TEXT: &str = "selftest: intentional failure";
const COUNTDOWN_FROM: u64 = 3;

/// Why a selftest step failed.
#[derive(Debug)]
enum StepError {
    Proxy(ProxyError),
    Unexpected(String),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Proxy(err) => write!(f, "{err}"),
            StepError::Unexpected(detail) => write!(f, "unexpected result: {detail}"),
        }
    }
}

impl From<ProxyError> for StepError {
    fn from(err: ProxyError) -> Self {
        StepError::Proxy(err)
    }
}

type StepOutcome = Result<String, StepError>;

#[derive(Serialize)]
struct StepResult {
    name: &'static str,
    ok: bool,
    elapsed_ms: f64,
    detail: String,
}

#[derive(Serialize)]
struct SelftestOutput {
    namespace: String,
    heartbeat_check: bool,
    heartbeat_interval_ms: u64,
    heartbeat_timeout_ms: u64,
    transfer: bool,
    passed: bool,
    steps: Vec<StepResult>,
}

pub fn run(args: SelftestArgs, format: OutputFormat) -> CliResult<i32> {
    let options = Options::default()
        .with_namespace(args.namespace)
        .with_heartbeat_check(!args.no_heartbeat)
        .with_heartbeat_interval(parse_duration(&args.heartbeat_interval)?)
        .with_heartbeat_timeout(parse_duration(&args.heartbeat_timeout)?)
        .with_transfer(args.transfer);
    options
        .validate()
        .map_err(|err| proxy_error("invalid options", err))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    let steps = runtime.block_on(run_steps(options.clone()))?;

    let passed = steps.iter().all(|step| step.ok);
    let out = SelftestOutput {
        namespace: options.namespace.clone(),
        heartbeat_check: options.heartbeat_check,
        heartbeat_interval_ms: options.heartbeat_interval.as_millis() as u64,
        heartbeat_timeout_ms: options.heartbeat_timeout.as_millis() as u64,
        transfer: options.transfer,
        passed,
        steps,
    };
    info!(passed, steps = out.steps.len(), "selftest finished");
    print_selftest(&out, format);

    Ok(if passed { SUCCESS } else { HEALTH_CHECK_FAILED })
}

fn selftest_target() -> Target {
    Target::builder()
        .object(
            "math",
            Target::builder()
                .sync_method("add", |args| {
                    let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                    Ok(Value::from(sum))
                })
                .build(),
        )
        .method("countdown", |args: Vec<Value>| async move {
            let from = args.first().and_then(Value::as_u64).unwrap_or(0);
            let callback = args
                .get(1)
                .and_then(Value::as_function)
                .cloned()
                .ok_or("countdown expects a callback")?;
            for n in (1..=from).rev() {
                callback.call(vec![Value::from(n)]).await;
            }
            Ok::<_, MethodError>(Value::from(from))
        })
        .sync_method("measure", |args| {
            let len = args
                .first()
                .and_then(Value::as_transferable)
                .and_then(|leaf| leaf.as_bytes())
                .map(|bytes| bytes.len())
                .unwrap_or(0);
            Ok(Value::from(len))
        })
        .sync_method("fail", |_| Err(FAILURE_TEXT.into()))
        .build()
}

async fn run_steps(options: Options) -> CliResult<Vec<StepResult>> {
    let (provide, inject) = define_proxy(|_| selftest_target(), options.clone())
        .map_err(|err| proxy_error("define proxy", err))?;
    let (provider_side, injector_side) = LoopbackAdapter::pair();
    provide
        .provide(provider_side, Vec::new())
        .await
        .map_err(|err| proxy_error("provide", err))?;
    let root = inject.inject(injector_side.clone());
    debug!(namespace = %options.namespace, "selftest channel ready");

    let mut steps = Vec::new();

    steps.push(
        step("heartbeat", async {
            heartbeat_check(&injector_side, &options).await?;
            Ok::<_, StepError>("provider answered".to_string())
        })
        .await,
    );

    steps.push(
        step("nested_call", async {
            let sum = root
                .path(["math", "add"])
                .call(vec![Value::from(2), Value::from(3)])
                .await?;
            expect(sum == Value::from(5), format!("math.add(2, 3) = {sum:?}"))
        })
        .await,
    );

    steps.push(step("callback", countdown(&root)).await);

    steps.push(
        step("remote_error", async {
            match root.member("fail").call(Vec::new()).await {
                Err(ProxyError::Remote(text)) => {
                    expect(text == FAILURE_TEXT, format!("remote error: {text}"))
                }
                Err(other) => Err(other.into()),
                Ok(value) => expect(false, format!("expected an error, got {value:?}")),
            }
        })
        .await,
    );

    steps.push(
        step("transfer", async {
            injector_side.clear_sent();
            let payload = Value::from(ctxbridge_protocol::Transferable::Buffer(
                vec![0u8; 64].into(),
            ));
            let len = root.member("measure").call(vec![payload]).await?;
            let hints: usize = injector_side
                .sent()
                .iter()
                .map(|sent| sent.transfer.len())
                .sum();
            let expected = usize::from(options.transfer);
            expect(
                len == Value::from(64) && hints == expected,
                format!("measure = {len:?}, transfer hints = {hints}"),
            )
        })
        .await,
    );

    Ok(steps)
}

async fn countdown(root: &Handle) -> StepOutcome {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback = Function::new(move |args| {
        let _ = tx.send(args);
    });

    root.member("countdown")
        .call(vec![Value::from(COUNTDOWN_FROM), Value::from(callback)])
        .await?;

    let mut seen = Vec::new();
    while seen.len() < COUNTDOWN_FROM as usize {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(args)) => seen.extend(args.first().and_then(Value::as_u64)),
            _ => break,
        }
    }
    expect(
        seen == [3, 2, 1],
        format!("callback received {seen:?}"),
    )
}

fn expect(ok: bool, detail: String) -> StepOutcome {
    if ok {
        Ok(detail)
    } else {
        Err(StepError::Unexpected(detail))
    }
}

async fn step<F>(name: &'static str, check: F) -> StepResult
where
    F: Future<Output = StepOutcome>,
{
    let started = Instant::now();
    let outcome = check.await;
    let elapsed_ms = (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
    let (ok, detail) = match outcome {
        Ok(detail) => (true, detail),
        Err(err) => (false, err.to_string()),
    };
    debug!(step = name, ok, elapsed_ms, "selftest step");
    StepResult {
        name,
        ok,
        elapsed_ms,
        detail,
    }
}

fn print_selftest(out: &SelftestOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = table(vec!["STEP", "OK", "ELAPSED", "DETAIL"]);
            for step in &out.steps {
                table.add_row(vec![
                    step.name.to_string(),
                    yes_no(step.ok).to_string(),
                    format!("{:.2}ms", step.elapsed_ms),
                    step.detail.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Selftest ({}):", out.namespace);
            for step in &out.steps {
                println!(
                    "  {:<14} {:<4} {:>8.2}ms  {}",
                    step.name,
                    if step.ok { "ok" } else { "FAIL" },
                    step.elapsed_ms,
                    step.detail
                );
            }
            println!("  Result:        {}", if out.passed { "passed" } else { "failed" });
        }
        OutputFormat::Raw => {
            println!("{}", if out.passed { "passed" } else { "failed" });
        }
    }
}
