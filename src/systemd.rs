//! Systemd unit file builder

/// A unit file: ordered sections of ordered `Key=Value` lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `key=value` to a section, creating the section on first use.
    ///
    /// Repeated keys are kept; systemd treats several directives as a list.
    pub fn set(&mut self, section: &str, key: &str, value: &str) -> &mut Self {
        let entry = (key.to_string(), value.to_string());
        match self.sections.iter_mut().find(|(name, _)| name == section) {
            Some((_, entries)) => entries.push(entry),
            None => self.sections.push((section.to_string(), vec![entry])),
        }
        self
    }

    /// Render the unit file
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|(name, entries)| {
                let mut block = format!("[{name}]\n");
                for (key, value) in entries {
                    block.push_str(key);
                    block.push('=');
                    block.push_str(value);
                    block.push('\n');
                }
                block
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sections_in_insertion_order() {
        let mut unit = Manifest::new();
        unit.set("Unit", "Description", "Hourly Log Rotation")
            .set("Timer", "OnCalendar", "hourly");
        assert_eq!(
            unit.render(),
            "[Unit]\nDescription=Hourly Log Rotation\n\n[Timer]\nOnCalendar=hourly\n"
        );
    }

    #[test]
    fn test_set_appends_to_existing_section() {
        let mut unit = Manifest::new();
        unit.set("Service", "ExecStartPre", "/bin/true")
            .set("Unit", "After", "network.target")
            .set("Service", "ExecStart", "/usr/bin/kubelet");
        assert_eq!(
            unit.render(),
            "[Service]\nExecStartPre=/bin/true\nExecStart=/usr/bin/kubelet\n\n[Unit]\nAfter=network.target\n"
        );
    }

    #[test]
    fn test_empty_manifest() {
        assert_eq!(Manifest::new().render(), "");
    }
}
