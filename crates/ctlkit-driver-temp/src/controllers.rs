//! Temperature controller with ramp sub-controllers.
//!
//! One [`TempController`] owns `num_ramp_controllers` [`TempRampController`]s, addressed as
//! `ramp01`, `ramp02`, ... . All of them share one [`IpConnection`]; each request/response
//! pair holds the connection for its whole duration.

use async_trait::async_trait;
use ctlkit_core::{
    bind_controller, bind_sub_controller, AttrDecl, Attribute, Controller, ControllerCore,
    ControllerNode, CtlResult, DataType, Declarations, Declare, IpConnection,
    IpConnectionSettings, MethodDecl, OnceCell, SubController,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::handler::{TempControllerHandler, TempNode};

/// Construction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempControllerSettings {
    /// Number of ramp channels on the device.
    pub num_ramp_controllers: usize,
    /// Where the device listens.
    #[serde(default)]
    pub ip_settings: IpConnectionSettings,
}

/// Root controller of the temperature device.
pub struct TempController {
    core: ControllerCore,
    settings: TempControllerSettings,
    conn: Arc<IpConnection>,
    ramps: Vec<Arc<TempRampController>>,
}

impl std::fmt::Debug for TempController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempController")
            .field("settings", &self.settings)
            .field("ramps", &self.ramps.len())
            .finish_non_exhaustive()
    }
}

impl TempController {
    /// Build the controller and register its ramp channels.
    pub fn new(settings: TempControllerSettings) -> CtlResult<Arc<Self>> {
        let conn = Arc::new(IpConnection::new());
        let ramps = (1..=settings.num_ramp_controllers)
            .map(|index| TempRampController::new(index, conn.clone()))
            .collect::<CtlResult<Vec<_>>>()?;

        let controller = bind_controller(|core| TempController {
            core,
            settings,
            conn,
            ramps,
        })?;
        for ramp in &controller.ramps {
            controller.core.register_sub_controller(ramp.clone())?;
        }
        Ok(controller)
    }

    /// The ramp channels, in channel order.
    pub fn ramps(&self) -> &[Arc<TempRampController>] {
        &self.ramps
    }

    /// Ramp rate in units per second.
    pub fn ramp_rate(&self) -> CtlResult<Arc<Attribute<f64>>> {
        self.core.attribute("ramp_rate")
    }

    /// Disable every ramp.
    pub async fn cancel_all(&self) -> CtlResult<()> {
        for ramp in &self.ramps {
            ramp.enabled()?.process(false).await?;
        }
        tracing::info!(ramps = self.ramps.len(), "cancelled all ramps");
        Ok(())
    }
}

impl ControllerNode for TempController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }
}

impl TempNode for TempController {
    fn conn(&self) -> &Arc<IpConnection> {
        &self.conn
    }

    fn suffix(&self) -> &str {
        ""
    }
}

#[async_trait]
impl Controller for TempController {
    async fn connect(&self) -> CtlResult<()> {
        self.conn.connect(&self.settings.ip_settings).await
    }

    async fn close(&self) -> CtlResult<()> {
        self.conn.close().await
    }
}

impl Declare for TempController {
    fn declarations() -> CtlResult<&'static Declarations<Self>> {
        static DECLS: OnceCell<Declarations<TempController>> = OnceCell::new();
        DECLS.get_or_try_init(|| {
            Declarations::new()
                .attribute(
                    "ramp_rate",
                    AttrDecl::<TempController, f64>::read_write(DataType::float())?
                        .with_handler(TempControllerHandler::new("R")),
                )?
                .method(
                    "cancel_all",
                    MethodDecl::command(|c: Arc<TempController>| async move {
                        c.cancel_all().await
                    })
                    .with_doc("Disable every ramp"),
                )
        })
    }
}

/// One ramp channel.
pub struct TempRampController {
    core: ControllerCore,
    suffix: String,
    conn: Arc<IpConnection>,
}

impl std::fmt::Debug for TempRampController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempRampController")
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

impl TempRampController {
    /// Channel `index` (1-based) over `conn`.
    pub fn new(index: usize, conn: Arc<IpConnection>) -> CtlResult<Arc<Self>> {
        let suffix = format!("{:02}", index);
        bind_sub_controller(format!("ramp{}", suffix), |core| TempRampController {
            core,
            suffix,
            conn,
        })
    }

    /// Ramp start value.
    pub fn start(&self) -> CtlResult<Arc<Attribute<i64>>> {
        self.core.attribute("start")
    }

    /// Ramp end value.
    pub fn end(&self) -> CtlResult<Arc<Attribute<i64>>> {
        self.core.attribute("end")
    }

    /// Current temperature.
    pub fn current(&self) -> CtlResult<Arc<Attribute<f64>>> {
        self.core.attribute("current")
    }

    /// Whether the channel is ramping.
    pub fn enabled(&self) -> CtlResult<Arc<Attribute<bool>>> {
        self.core.attribute("enabled")
    }
}

impl ControllerNode for TempRampController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }
}

impl SubController for TempRampController {}

impl TempNode for TempRampController {
    fn conn(&self) -> &Arc<IpConnection> {
        &self.conn
    }

    fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl Declare for TempRampController {
    fn declarations() -> CtlResult<&'static Declarations<Self>> {
        static DECLS: OnceCell<Declarations<TempRampController>> = OnceCell::new();
        DECLS.get_or_try_init(|| {
            Declarations::new()
                .attribute(
                    "start",
                    AttrDecl::<TempRampController, i64>::read_write(DataType::int())?
                        .with_handler(TempControllerHandler::new("S")),
                )?
                .attribute(
                    "end",
                    AttrDecl::<TempRampController, i64>::read_write(DataType::int())?
                        .with_handler(TempControllerHandler::new("E")),
                )?
                .attribute(
                    "current",
                    AttrDecl::<TempRampController, f64>::read(DataType::float_with_prec(3))?
                        .with_handler(TempControllerHandler::new("T")),
                )?
                .attribute(
                    "enabled",
                    AttrDecl::<TempRampController, bool>::read_write(
                        DataType::bool_with_labels("Off", "On"),
                    )?
                    .with_handler(TempControllerHandler::new("N")),
                )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctlkit_core::{AttrMode, Mapping, TaskSet};
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn settings(n: usize) -> TempControllerSettings {
        TempControllerSettings {
            num_ramp_controllers: n,
            ip_settings: IpConnectionSettings::default(),
        }
    }

    #[test]
    fn test_structure() {
        let controller = TempController::new(settings(3)).unwrap();
        let mapping = Mapping::build(controller.clone()).unwrap();

        let paths: Vec<_> = mapping
            .sub_mappings()
            .iter()
            .map(|m| m.path().join("/"))
            .collect();
        assert_eq!(paths, vec!["ramp01", "ramp02", "ramp03"]);

        let ramp = &controller.ramps()[0];
        assert_eq!(ramp.suffix(), "01");
        assert_eq!(ramp.current().unwrap().dtype().precision(), Some(3));
        assert_eq!(ramp.current().unwrap().mode(), AttrMode::Read);
        assert_eq!(
            ramp.enabled().unwrap().dtype().labels(),
            Some(("Off", "On"))
        );
        assert_eq!(
            mapping.root().method("cancel_all").unwrap().doc(),
            Some("Disable every ramp")
        );
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: TempControllerSettings = toml::from_str(
            "num_ramp_controllers = 4\n[ip_settings]\nip = \"10.0.0.5\"\nport = 4001\n",
        )
        .unwrap();
        assert_eq!(settings.num_ramp_controllers, 4);
        assert_eq!(settings.ip_settings.port, 4001);
    }

    #[tokio::test]
    async fn test_handler_traffic_over_duplex() {
        let controller = TempController::new(settings(2)).unwrap();
        let mapping = Mapping::build(controller.clone()).unwrap();
        let tasks = TaskSet::derive(&mapping).unwrap();
        // ramp_rate plus start/end/current/enabled on each ramp.
        assert_eq!(tasks.scan.len(), 9);

        let (client, server) = duplex(1024);
        controller.conn().attach(Box::new(client)).await;

        let device = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let mut seen = Vec::new();
            for _ in 0..4 {
                let mut line = String::new();
                server.read_line(&mut line).await.unwrap();
                if line.starts_with("T02?") {
                    server.get_mut().write_all(b"12.125\r\n").await.unwrap();
                }
                seen.push(line);
            }
            seen
        });

        let ramp = &controller.ramps()[1];
        ramp.enabled().unwrap().process(true).await.unwrap();
        let current = ramp.current().unwrap();
        current.io().unwrap().update(current.as_ref()).await.unwrap();
        controller.cancel_all().await.unwrap();

        assert_eq!(current.get().unwrap(), 12.125);
        let seen = device.await.unwrap();
        assert_eq!(seen, vec!["N02=1\r\n", "T02?\r\n", "N01=0\r\n", "N02=0\r\n"]);
    }
}
