//! get_system_info — memory, disk, and uptime summary.

use async_trait::async_trait;
use sysinfo::{Disks, System};

use relayclaw_core::error::ToolError;
use relayclaw_core::tool::Tool;

pub struct GetSystemInfoTool {
    work_dir: String,
}

impl GetSystemInfoTool {
    pub fn new(work_dir: String) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Tool for GetSystemInfoTool {
    fn name(&self) -> &str {
        "get_system_info"
    }

    fn description(&self) -> &str {
        "Report system information: memory usage, disk space, and uptime."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        let mut sys = System::new();
        sys.refresh_memory();

        let disks = Disks::new_with_refreshed_list();
        let disk_lines: Vec<String> = disks
            .list()
            .iter()
            .map(|d| {
                format!(
                    "{} {} total={}MB available={}MB",
                    d.name().to_string_lossy(),
                    d.mount_point().display(),
                    d.total_space() / 1024 / 1024,
                    d.available_space() / 1024 / 1024,
                )
            })
            .collect();

        let info = serde_json::json!({
            "memory": {
                "total_mb": sys.total_memory() / 1024 / 1024,
                "used_mb": sys.used_memory() / 1024 / 1024,
                "available_mb": sys.available_memory() / 1024 / 1024,
            },
            "disks": disk_lines,
            "uptime_s": System::uptime(),
            "hostname": System::host_name().unwrap_or_default(),
            "os": System::long_os_version().unwrap_or_default(),
            "work_dir": self.work_dir,
        });

        serde_json::to_string_pretty(&info).map_err(|e| ToolError::ExecutionFailed {
            tool: "get_system_info".into(),
            reason: e.to_string(),
        })
    }
}
