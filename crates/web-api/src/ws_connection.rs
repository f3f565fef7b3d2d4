//! WebSocket 连接适配
//!
//! 把 axum 的 WebSocket 拆成读写两半，转换成会话泵使用的帧流和文本 Sink。
//! Ping/Pong 由底层协议处理，不进入会话。

use application::{ClientSession, InboundFrame, SessionContext, TransportError};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{future, SinkExt, StreamExt};

fn inbound_frame(message: Result<WsMessage, axum::Error>) -> Option<Result<InboundFrame, TransportError>> {
    match message {
        Ok(WsMessage::Text(text)) => Some(Ok(InboundFrame::Text(text.as_str().to_owned()))),
        Ok(WsMessage::Binary(bytes)) => Some(Ok(InboundFrame::Binary(bytes.to_vec()))),
        Ok(WsMessage::Close(_)) => {
            tracing::info!("WebSocket收到关闭消息");
            Some(Ok(InboundFrame::Close))
        }
        Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => None,
        Err(err) => Some(Err(TransportError::io(err.to_string()))),
    }
}

/// 在已升级的连接上运行客户端会话，直到连接关闭
pub async fn run_session(socket: WebSocket, ctx: SessionContext, session: ClientSession) {
    let session_id = session.id();
    tracing::info!(session_id = %session_id, "WebSocket 连接已建立");

    let (sender, receiver) = socket.split();
    let incoming = receiver.filter_map(|message| future::ready(inbound_frame(message)));
    let outgoing = sender
        .sink_map_err(|err| TransportError::io(err.to_string()))
        .with(|payload: String| future::ready(Ok::<_, TransportError>(WsMessage::Text(payload.into()))));

    let state = session.run(&ctx, incoming, outgoing).await;
    tracing::info!(session_id = %session_id, state = ?state, "WebSocket连接已断开");
}
