//! 服务端内置的示例端点。

use socket_runtime::{
    EndpointBuilder, EndpointTable, ExecutionMode, GroupKeyStrategy, Message, Reply, Result,
};
use tracing::info;

pub fn register_endpoints(table: &mut EndpointTable) -> Result<()> {
    table.register(uppercase_endpoint().build()?)?;
    table.register(echo_endpoint().build()?)?;
    table.register(chat_endpoint().build()?)?;
    Ok(())
}

/// `/up/{client}`：收到的文本转为大写，以 `{client}:` 为前缀广播给所有 `/up` 连接。
fn uppercase_endpoint() -> EndpointBuilder {
    EndpointBuilder::new("/up/{client}").on_message(true, |ctx, msg| async move {
        let client = ctx.path_param("client").unwrap_or_default().to_string();
        let text = match &msg {
            Message::Text(text) => text.to_uppercase(),
            Message::Binary(bytes) => String::from_utf8_lossy(bytes).to_uppercase(),
        };
        Ok(Reply::text(format!("{client}:{text}")))
    })
}

/// `/echo/{id}`：原样回显给发送方。
fn echo_endpoint() -> EndpointBuilder {
    EndpointBuilder::new("/echo/{id}")
        .on_message(false, |_ctx, msg| async move { Ok(Reply::Single(msg)) })
}

/// `/chat/{room}/{user}`：同一房间内广播，消息并发处理。
fn chat_endpoint() -> EndpointBuilder {
    EndpointBuilder::new("/chat/{room}/{user}")
        .execution_mode(ExecutionMode::Concurrent)
        .group_by(GroupKeyStrategy::PathParam("room".to_string()))
        .on_open(true, |ctx| async move {
            let user = ctx.path_param("user").unwrap_or_default().to_string();
            Ok(Reply::text(format!("{user} joined")))
        })
        .on_message(true, |ctx, msg| async move {
            let user = ctx.path_param("user").unwrap_or_default().to_string();
            let text = msg.as_text().unwrap_or_default().to_string();
            Ok(Reply::text(format!("{user}: {text}")))
        })
        .on_close(|ctx| async move {
            let user = ctx.path_param("user").unwrap_or_default().to_string();
            info!(connection_id = %ctx.connection_id(), %user, "chat member left");
            ctx.broadcast(Message::text(format!("{user} left"))).await;
            Ok(())
        })
}
