//! Programs and activities shared by the integration tests.

use std::time::Duration;

use futures::future::join_all;
use nimbus_durable::{
    ActivityError, HistoryEvent, InstanceRecord, OrchestrationError, Registry, RuntimeStatus,
};
use serde_json::{json, Value};

use super::Invocations;

/// How long `execute_job` takes for a city. Later cities finish first.
fn job_delay(city: &str) -> Duration {
    match city {
        "Frankfurt" => Duration::from_millis(120),
        "Seattle" => Duration::from_millis(60),
        _ => Duration::from_millis(5),
    }
}

pub fn registry(invocations: &Invocations) -> Registry {
    let jobs = invocations.clone();
    let counted = invocations.clone();
    let shutdowns = invocations.clone();

    Registry::builder()
        .activity_fn("execute_job", move |_ctx, input| {
            let jobs = jobs.clone();
            async move {
                let city = input.as_str().unwrap_or_default().to_owned();
                jobs.record(city.clone());
                tokio::time::sleep(job_delay(&city)).await;
                Ok(json!(format!("Hello {city}!")))
            }
        })
        .activity_fn("tick", |_ctx, input| async move { Ok(input) })
        .activity_fn("counted", move |_ctx, input| {
            let counted = counted.clone();
            async move {
                counted.record(format!("counted {input}"));
                Ok(input)
            }
        })
        .activity_fn("interrupt_once", move |_ctx, _input| {
            let shutdowns = shutdowns.clone();
            async move {
                shutdowns.record("interrupt_once");
                if shutdowns.snapshot().len() == 1 {
                    return Err(ActivityError::interrupted("shutting down"));
                }
                Ok(json!("resumed"))
            }
        })
        .activity_fn("fail", |_ctx, input| async move {
            Err(ActivityError::new(format!(
                "deployment {} failed",
                input.as_str().unwrap_or_default()
            )))
        })
        .activity_fn("sleep_long", |_ctx, _input| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        })
        .orchestration_fn("sequence", |ctx, _input| async move {
            let mut outputs = Vec::new();
            for city in ["Tokyo", "Seattle", "London"] {
                outputs.push(ctx.call_activity::<_, String>("execute_job", city).await?);
            }
            Ok(json!(outputs))
        })
        .orchestration_fn("fan_out", |ctx, _input| async move {
            let jobs: Vec<_> = ["Frankfurt", "Seattle", "Sarajevo"]
                .into_iter()
                .map(|city| ctx.call_activity::<_, String>("execute_job", city))
                .collect();
            let outputs = join_all(jobs)
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(json!(outputs))
        })
        .orchestration_fn("monitor", |ctx, input| async move {
            let iteration = input["iteration"].as_u64().unwrap_or_default();
            let limit = input["limit"].as_u64().unwrap_or_default();

            let seen: u64 = ctx.call_activity("tick", &iteration).await?;
            ctx.set_custom_status(&json!({ "iteration": seen }))?;

            if seen < limit {
                return ctx
                    .continue_as_new(&json!({ "iteration": seen + 1, "limit": limit }))
                    .await;
            }
            Ok(json!(seen))
        })
        .orchestration_fn("restless", |ctx, input| async move {
            let iteration = input["iteration"].as_u64().unwrap_or_default();
            let limit = input["limit"].as_u64().unwrap_or_default();

            if iteration >= limit {
                return ctx.call_activity::<_, Value>("counted", &"final").await;
            }

            // Schedules a step in the same episode that continues as new.
            let next = json!({ "iteration": iteration + 1, "limit": limit });
            let (_step, continued) = futures::join!(
                ctx.call_activity::<_, Value>("counted", &iteration),
                ctx.continue_as_new::<_, Value>(&next),
            );
            continued
        })
        .orchestration_fn("interruptible", |ctx, _input| async move {
            ctx.call_activity::<_, Value>("interrupt_once", &"step").await
        })
        .orchestration_fn("failing", |ctx, input| async move {
            let tx = input["transaction_id"].as_str().unwrap_or_default().to_owned();
            ctx.call_activity::<_, Value>("fail", &tx).await?;
            Ok(Value::Null)
        })
        .orchestration_fn("stalled", |_ctx, _input| async move {
            futures::future::pending::<()>().await;
            Ok(Value::Null)
        })
        .orchestration_fn("swallowing", |ctx, _input| async move {
            // Ignores any error from its only step.
            let _ = ctx.call_activity::<_, String>("execute_job", "Tokyo").await;
            Ok(json!("done"))
        })
        .orchestration_fn("slow", |ctx, _input| async move {
            ctx.call_activity::<_, Value>("sleep_long", &Value::Null).await?;
            Ok(Value::Null)
        })
        .orchestration_fn("rejecting", |_ctx, _input| async move {
            Err(OrchestrationError::custom("input rejected"))
        })
        .build()
}

/// A `Running` record with the given history, as left behind by a crash.
pub fn interrupted(id: &str, program: &str, history: Vec<HistoryEvent>) -> InstanceRecord {
    let mut record = InstanceRecord::new(id.into(), program, Value::Null);
    record.status = RuntimeStatus::Running;
    record.history = history;
    record
}

pub fn scheduled(seq: u64, name: &str, input: &str) -> HistoryEvent {
    HistoryEvent::ActivityScheduled {
        seq,
        name: name.to_owned(),
        input: json!(input),
    }
}

pub fn completed(seq: u64, result: &str) -> HistoryEvent {
    HistoryEvent::ActivityCompleted {
        seq,
        result: json!(result),
    }
}
