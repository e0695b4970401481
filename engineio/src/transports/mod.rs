mod polling;
mod websocket;

pub use self::polling::PollingTransport;
pub use self::websocket::WebsocketTransport;
