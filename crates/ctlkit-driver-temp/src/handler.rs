//! ASCII handler for the temperature controller protocol.
//!
//! Every attribute maps to a one-letter command code. The channel suffix of the owning
//! controller (empty for the root, `01`, `02`, ... for ramps) is appended to the code:
//!
//! | Direction | Message |
//! |-----------|---------|
//! | write     | `<code><suffix>=<value>\r\n` (booleans as `0`/`1`) |
//! | read      | `<code><suffix>?\r\n`, answered by one line holding the value |

use async_trait::async_trait;
use ctlkit_core::{AnyAttribute, ControllerNode, CtlResult, IpConnection, Sender, Updater, Value};
use std::sync::Arc;
use std::time::Duration;

/// Default polling period of every handled attribute.
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_millis(200);

/// A controller node that talks over the shared temperature controller link.
pub trait TempNode: ControllerNode {
    /// The shared connection.
    fn conn(&self) -> &Arc<IpConnection>;

    /// Channel suffix appended to command codes.
    fn suffix(&self) -> &str;
}

/// Sender and updater for one command code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempControllerHandler {
    name: String,
    update_period: Duration,
}

impl TempControllerHandler {
    /// Handler for command code `name`, polled every 0.2 s.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            update_period: DEFAULT_UPDATE_PERIOD,
        }
    }

    /// Override the polling period.
    pub fn with_update_period(mut self, period: Duration) -> Self {
        self.update_period = period;
        self
    }

    /// The command code.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn write_message(&self, suffix: &str, value: &Value) -> String {
        match value {
            Value::Bool(b) => format!("{}{}={}\r\n", self.name, suffix, u8::from(*b)),
            other => format!("{}{}={}\r\n", self.name, suffix, other),
        }
    }

    fn query_message(&self, suffix: &str) -> String {
        format!("{}{}?\r\n", self.name, suffix)
    }
}

#[async_trait]
impl<C: TempNode> Sender<C> for TempControllerHandler {
    async fn put(&self, controller: &C, _attr: &dyn AnyAttribute, value: Value) -> CtlResult<()> {
        let message = self.write_message(controller.suffix(), &value);
        controller.conn().send_command(&message).await
    }
}

#[async_trait]
impl<C: TempNode> Updater<C> for TempControllerHandler {
    fn update_period(&self) -> Duration {
        self.update_period
    }

    async fn update(&self, controller: &C, attr: &dyn AnyAttribute) -> CtlResult<()> {
        let response = controller
            .conn()
            .send_query(&self.query_message(controller.suffix()))
            .await?;
        attr.set_value(Value::Text(response)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_format() {
        let handler = TempControllerHandler::new("N");
        assert_eq!(handler.write_message("01", &Value::Bool(true)), "N01=1\r\n");
        assert_eq!(handler.write_message("02", &Value::Bool(false)), "N02=0\r\n");
        assert_eq!(handler.query_message("02"), "N02?\r\n");

        let handler = TempControllerHandler::new("R");
        assert_eq!(handler.write_message("", &Value::Float(2.5)), "R=2.5\r\n");
        assert_eq!(handler.query_message(""), "R?\r\n");
        assert_eq!(
            TempControllerHandler::new("S").write_message("03", &Value::Int(40)),
            "S03=40\r\n"
        );
    }

    #[test]
    fn test_update_period() {
        let handler = TempControllerHandler::new("T");
        assert_eq!(handler.update_period, DEFAULT_UPDATE_PERIOD);
        let handler = handler.with_update_period(Duration::from_millis(50));
        assert_eq!(handler.update_period, Duration::from_millis(50));
        assert_eq!(handler.name(), "T");
    }
}
