//! WebSocket client for the marker hub.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, Stream, StreamExt};
use shared::{AddMarkerEvent, Envelope, Marker};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// How long `add_marker` waits for the hub to answer the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Decode one hub message into a marker. Anything else is skipped.
fn decode_marker(text: &str) -> Option<Marker> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("Skipping message that is not an envelope: {}", e);
            return None;
        }
    };
    let marker = envelope.marker();
    if marker.is_none() {
        tracing::debug!(kind = %envelope.r#type, "Skipping envelope without a marker");
    }
    marker
}

fn format_marker(marker: &Marker) -> String {
    format!(
        "{}  {} ({:.4}, {:.4})  {}",
        marker.timestamp, marker.name, marker.lat, marker.lon, marker.description
    )
}

/// Hand every marker on `incoming` to `on_marker` until the hub closes.
async fn for_each_marker<S, F>(mut incoming: S, mut on_marker: F) -> Result<()>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
    F: FnMut(Marker),
{
    while let Some(msg) = incoming.next().await {
        match msg? {
            Message::Text(t) => {
                if let Some(marker) = decode_marker(&t) {
                    on_marker(marker);
                }
            }
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    tracing::info!(code = u16::from(frame.code), reason = %frame.reason, "Hub closed the connection");
                }
                break;
            }
            _ => continue,
        }
    }
    Ok(())
}

/// Collect markers until nothing arrives for `idle`.
async fn collect_until_idle<S>(incoming: &mut S, idle: Duration) -> Result<Vec<Marker>>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut markers = Vec::new();
    loop {
        let msg = match tokio::time::timeout(idle, incoming.next()).await {
            Ok(Some(msg)) => msg?,
            Ok(None) | Err(_) => break,
        };
        match msg {
            Message::Text(t) => markers.extend(decode_marker(&t)),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(markers)
}

/// Print the live feed, reconnecting after a disconnect unless `once`.
pub async fn watch(url: &str, once: bool) -> Result<()> {
    loop {
        match connect_async(url).await {
            Ok((ws, _)) => {
                tracing::info!("Connected to hub");
                let result = for_each_marker(ws, |m| println!("{}", format_marker(&m))).await;
                if once {
                    return result;
                }
                if let Err(e) = result {
                    tracing::warn!("Connection error: {}", e);
                }
            }
            Err(e) => {
                if once {
                    return Err(e).with_context(|| format!("connect to {}", url));
                }
                tracing::warn!("Connect failed: {}, retrying in 5s", e);
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Print the stored markers as a JSON array.
pub async fn dump(url: &str, idle: Duration) -> Result<()> {
    let (mut ws, _) = connect_async(url)
        .await
        .with_context(|| format!("connect to {}", url))?;
    let markers = collect_until_idle(&mut ws, idle).await?;
    ws.close(None).await.ok();

    println!("{}", serde_json::to_string_pretty(&markers)?);
    Ok(())
}

/// Send one `addMarker` event, then close normally.
pub async fn add_marker(url: &str, event: &AddMarkerEvent) -> Result<()> {
    event.validate()?;

    let (mut ws, _) = connect_async(url)
        .await
        .with_context(|| format!("connect to {}", url))?;
    ws.send(Message::Text(serde_json::to_string(event)?))
        .await
        .context("send marker")?;
    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }))
    .await
    .context("close connection")?;

    // Snapshot markers may still be in flight ahead of the close reply.
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use shared::encode_marker;

    fn marker(name: &str) -> Marker {
        AddMarkerEvent::new(name, "desc", 42.3187, -71.0004).into_marker("2025-06-01T12:00:00Z")
    }

    fn text(marker: &Marker) -> Result<Message, WsError> {
        Ok(Message::Text(encode_marker(marker).unwrap()))
    }

    #[test]
    fn decode_skips_foreign_messages() {
        assert_eq!(decode_marker(&encode_marker(&marker("a")).unwrap()), Some(marker("a")));
        assert_eq!(decode_marker("not json"), None);
        assert_eq!(decode_marker(r#"{"type":"binary","value":"{}"}"#), None);
        assert_eq!(decode_marker(r#"{"type":"text","value":"nope"}"#), None);
        assert_eq!(decode_marker(r#"{"type":"text","value":"{\"name\":\"x\"}"}"#), None);
    }

    #[test]
    fn format_shows_name_and_rounded_coordinates() {
        let line = format_marker(&marker("Pier"));
        assert!(line.contains("Pier (42.3187, -71.0004)"));
        assert!(line.starts_with("2025-06-01T12:00:00Z"));
    }

    #[tokio::test]
    async fn for_each_marker_stops_at_close() {
        let incoming = stream::iter(vec![
            text(&marker("a")),
            Ok(Message::Ping(vec![1])),
            Ok(Message::Text("garbage".to_string())),
            text(&marker("b")),
            Ok(Message::Close(None)),
            text(&marker("after close")),
        ]);
        let mut seen = Vec::new();
        for_each_marker(incoming, |m| seen.push(m.name)).await.unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn for_each_marker_surfaces_transport_errors() {
        let incoming = stream::iter(vec![text(&marker("a")), Err(WsError::ConnectionClosed)]);
        let mut seen = 0;
        assert!(for_each_marker(incoming, |_| seen += 1).await.is_err());
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn collect_stops_once_the_hub_goes_quiet() {
        let mut incoming = stream::iter(vec![text(&marker("a")), text(&marker("b"))])
            .chain(stream::pending());
        let markers = collect_until_idle(&mut incoming, Duration::from_millis(50))
            .await
            .unwrap();
        let names: Vec<_> = markers.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn add_rejects_out_of_range_before_connecting() {
        let event = AddMarkerEvent::new("bad", "", 91.0, 0.0);
        // Nothing listens here; validation must fail first.
        let err = add_marker("ws://127.0.0.1:1", &event).await.unwrap_err();
        assert!(err.to_string().contains("lat out of range"));
    }
}
