#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use socket_runtime::{
    EndpointBuilder, EndpointTable, ExecutionMode, Message, OutboundReceiver, Reply, Runtime,
    RuntimeConfig,
};

/// 记录 handler 调用顺序。
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().expect("call log lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("call log lock").clone()
    }
}

/// `/up/{client}`：把消息转成大写并以 `{client}:` 前缀广播。
pub fn uppercase_endpoint() -> EndpointBuilder {
    EndpointBuilder::new("/up/{client}").on_message(true, |ctx, msg| async move {
        let client = ctx.path_param("client").unwrap_or("?").to_string();
        let text = msg.as_text().unwrap_or_default().to_uppercase();
        Ok(Reply::text(format!("{client}:{text}")))
    })
}

/// 带随机耗时的回显端点，用于验证串行/并发语义。
pub fn recording_endpoint(path: &str, mode: ExecutionMode, log: CallLog) -> EndpointBuilder {
    EndpointBuilder::new(path)
        .execution_mode(mode)
        .on_message(false, move |_ctx, msg| {
            let log = log.clone();
            async move {
                let text = msg.as_text().unwrap_or_default().to_string();
                let index: u64 = text.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis((index * 7) % 11)).await;
                log.push(text.clone());
                Ok(Reply::text(text))
            }
        })
}

pub fn build_runtime(builders: Vec<EndpointBuilder>) -> Arc<Runtime> {
    build_runtime_with(RuntimeConfig::default(), builders)
}

pub fn build_runtime_with(config: RuntimeConfig, builders: Vec<EndpointBuilder>) -> Arc<Runtime> {
    let mut table = EndpointTable::new();
    for builder in builders {
        table
            .register(builder.build().expect("endpoint should build"))
            .expect("endpoint should register");
    }
    Arc::new(Runtime::new(config, table).expect("runtime should build"))
}

pub async fn recv_text(rx: &mut OutboundReceiver) -> String {
    let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("message should arrive in time")
        .expect("send queue should stay open");
    match message.as_ref() {
        Message::Text(text) => text.clone(),
        Message::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

pub fn drain_texts(rx: &mut OutboundReceiver) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message.as_text().unwrap_or_default().to_string());
    }
    out
}
