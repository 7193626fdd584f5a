/// A resource of the Bigtable data API, named by its full path.
pub trait BigtableResource {
    fn resources_id(&self) -> String;
    fn name(&self) -> &str;
    fn id(&self) -> String {
        format!("{}/{}", self.resources_id(), self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceId {
    project: String,
    name: String,
}

impl InstanceId {
    pub fn new(project: &str, name: &str) -> Self {
        Self {
            project: project.to_string(),
            name: name.to_string(),
        }
    }

    /// The table `name` of this instance.
    pub fn table(&self, name: &str) -> TableId {
        TableId::new(self.clone(), name)
    }
}

impl BigtableResource for InstanceId {
    fn name(&self) -> &str {
        &self.name
    }

    fn resources_id(&self) -> String {
        format!("projects/{}/instances", self.project)
    }
}

/// A table, named `projects/<project>/instances/<instance>/tables/<table>` in requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableId(InstanceId, String);

impl TableId {
    pub fn new(instance: InstanceId, name: &str) -> Self {
        Self(instance, name.to_string())
    }
}

impl BigtableResource for TableId {
    fn name(&self) -> &str {
        &self.1
    }

    fn resources_id(&self) -> String {
        format!("{}/tables", self.0.id())
    }
}
