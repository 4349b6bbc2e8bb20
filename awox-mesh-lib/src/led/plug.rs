use anyhow::Result;
use log::debug;

use crate::control_interface::LightStatus;
use crate::mesh::{AwoxMesh, MeshEvent};

/// A mesh plug. Only knows on and off.
pub struct MeshPlugEntity {
    mesh: AwoxMesh,
    mesh_id: u16,
    mac: Option<String>,
    name: String,
    state: Option<bool>,
}

impl MeshPlugEntity {
    pub fn new(mesh: AwoxMesh, mesh_id: u16, mac: Option<String>, name: &str) -> Self {
        MeshPlugEntity {
            mesh,
            mesh_id,
            mac,
            name: name.to_string(),
            state: None,
        }
    }

    pub async fn register(&self) {
        self.mesh
            .register_device(self.mesh_id, self.mac.clone(), &self.name)
            .await;
    }

    pub fn unique_id(&self) -> String {
        format!("awoxmesh-{}", self.mesh_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_on(&self) -> bool {
        self.state.unwrap_or(false)
    }

    pub async fn turn_on(&mut self) -> Result<()> {
        debug!("[{}] turn on", self.unique_id());
        self.mesh.on(self.mesh_id).await?;
        self.state = Some(true);
        Ok(())
    }

    pub async fn turn_off(&mut self) -> Result<()> {
        debug!("[{}] turn off", self.unique_id());
        self.mesh.off(self.mesh_id).await?;
        self.state = Some(false);
        Ok(())
    }

    pub fn apply_status(&mut self, status: LightStatus) {
        self.state = Some(status.state);
        debug!("[{}][{}] Status update: {:?}", self.unique_id(), self.name, status);
    }

    pub fn handle_event(&mut self, event: &MeshEvent) {
        match event {
            MeshEvent::Status(status) if status.mesh_id == self.mesh_id => self.apply_status(*status),
            MeshEvent::Unavailable(mesh_id) if *mesh_id == self.mesh_id => self.state = None,
            _ => {}
        }
    }
}
