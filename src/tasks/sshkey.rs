//! EC2 key pairs

use crate::cloud::{AwsCloud, KeyPairInfo};
use crate::pki;
use reconcile::{
    CloudTarget, Context, Delta, ErrorCategory, Lifecycle, Literal, Renderers, Tags, Task,
    TaskError, TaskOutput, TerraformTarget, with_retry_logged,
};
use serde::Serialize;

/// An SSH key pair registered with the cloud.
///
/// Without a public key the task refers to a key pair that already exists
/// in the account; such a key is looked up but never created or rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKey {
    pub id: Option<String>,
    pub name: String,
    pub lifecycle: Lifecycle,
    /// Owned outside this cluster; tags are left alone
    pub shared: bool,
    pub public_key: Option<String>,
    pub key_fingerprint: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Default, Serialize)]
pub struct SshKeyChanges {
    pub name: Option<String>,
    pub public_key: Option<String>,
    pub key_fingerprint: Option<String>,
    pub tags: Option<Tags>,
}

impl SshKey {
    /// Whether this refers to a key pair that already exists
    pub fn is_existing_key(&self) -> bool {
        self.public_key.is_none()
    }

    /// Name usable as a Terraform resource name
    fn terraform_name(&self) -> String {
        self.name.replace(':', "")
    }

    /// Fingerprint of the desired public key, computed on first use
    fn expected_fingerprint(&mut self) -> Result<Option<String>, TaskError> {
        if self.key_fingerprint.is_none()
            && let Some(public_key) = &self.public_key
        {
            let fingerprint = pki::cloud_fingerprint(public_key).map_err(|e| {
                TaskError::Validation(format!("computing fingerprint for SSH key {}: {}", self.name, e))
            })?;
            log::debug!("Computed SSH key fingerprint as {:?}", fingerprint);
            self.key_fingerprint = Some(fingerprint);
        }
        Ok(self.key_fingerprint.clone())
    }
}

/// Fingerprint in the form `ssh-keygen -lf` prints it
fn normalized_fingerprint(key: &KeyPairInfo) -> String {
    if key.key_type == "ed25519" {
        format!("SHA256:{}", key.key_fingerprint.trim_end_matches('='))
    } else {
        key.key_fingerprint.clone()
    }
}

impl Task for SshKey {
    const KIND: &'static str = "SSHKey";
    type Changes = SshKeyChanges;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn find(&mut self, ctx: &Context) -> Result<Option<Self>, TaskError> {
        let cloud = ctx.cloud_as::<AwsCloud>()?;
        let names = vec![self.name.clone()];

        let keys = match with_retry_logged(|| Ok(cloud.ec2().describe_key_pairs(&names)?)) {
            Ok(keys) => keys,
            Err(e) if e.category() == ErrorCategory::NotFound => Vec::new(),
            Err(e) => {
                return Err(TaskError::backend(
                    e.category(),
                    format!("error listing SSH keys: {e}"),
                ));
            }
        };

        let key = match keys.as_slice() {
            [] if self.is_existing_key() => {
                return Err(TaskError::Other(format!(
                    "unable to find specified SSH key {:?}",
                    self.name
                )));
            }
            [] => return Ok(None),
            [key] => key,
            _ => {
                return Err(TaskError::Ambiguous {
                    kind: Self::KIND,
                    name: self.name.clone(),
                    count: keys.len(),
                });
            }
        };

        let expected_fingerprint = self.expected_fingerprint()?;
        let mut actual = Self {
            id: Some(key.key_pair_id.clone()),
            name: key.key_name.clone(),
            lifecycle: self.lifecycle,
            shared: self.shared,
            public_key: None,
            key_fingerprint: Some(normalized_fingerprint(key)),
            tags: key.tags.clone(),
        };

        if actual.key_fingerprint == expected_fingerprint {
            log::debug!("SSH key fingerprints match; assuming public keys match");
            actual.public_key.clone_from(&self.public_key);
        } else {
            log::debug!(
                "Computed SSH key fingerprint mismatch: {:?} {:?}",
                expected_fingerprint,
                actual.key_fingerprint
            );
        }
        // Tags added out of band are not drift; shared keys are not tagged at all
        let has_expected_tags = self
            .tags
            .iter()
            .all(|(key, value)| actual.tags.get(key) == Some(value));
        if actual.shared || has_expected_tags {
            actual.tags.clone_from(&self.tags);
        }

        self.id.clone_from(&actual.id);
        if self.is_existing_key() {
            self.key_fingerprint.clone_from(&actual.key_fingerprint);
        }
        Ok(Some(actual))
    }

    fn normalize(&mut self, _ctx: &Context) -> Result<(), TaskError> {
        self.expected_fingerprint().map(drop)
    }

    fn changes(actual: Option<&Self>, expected: &Self) -> SshKeyChanges {
        let d = Delta::new(actual, expected);
        SshKeyChanges {
            name: d.exact(|k| &k.name).filter(|n| !n.is_empty()),
            public_key: d.opt(|k| &k.public_key),
            key_fingerprint: d.opt(|k| &k.key_fingerprint),
            tags: d.value(|k| &k.tags),
        }
    }

    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        changes: &SshKeyChanges,
    ) -> Result<(), TaskError> {
        if let (Some(actual), Some(_)) = (actual, &changes.name) {
            return Err(TaskError::cannot_change("name", &actual.name, &expected.name));
        }
        Ok(())
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new()
            .cloud(render_cloud)
            .terraform(render_terraform)
    }

    fn output(&self) -> TaskOutput {
        let terraform = if self.is_existing_key() {
            Literal::value(&self.name)
        } else {
            Literal::property("aws_key_pair", self.terraform_name(), "id")
        };
        TaskOutput {
            id: self.id.clone(),
            terraform: Some(terraform),
        }
    }
}

fn render_cloud(
    ctx: &Context,
    target: &CloudTarget,
    actual: Option<&SshKey>,
    expected: &mut SshKey,
    _changes: &SshKeyChanges,
) -> Result<(), TaskError> {
    let cloud = target.cloud_as::<AwsCloud>()?;

    if actual.is_none() {
        log::info!("Creating SSHKey with name {:?}", expected.name);
        let public_key = expected.public_key.as_deref().ok_or_else(|| {
            TaskError::Validation(format!(
                "SSH key {:?} does not exist and has no public key to import",
                expected.name
            ))
        })?;
        let created = with_retry_logged(|| {
            Ok(cloud
                .ec2()
                .import_key_pair(&expected.name, public_key, &expected.tags)?)
        })
        .map_err(|e| TaskError::backend(e.category(), format!("error creating SSHKey: {e}")))?;

        expected.key_fingerprint = Some(normalized_fingerprint(&created));
        ctx.tags().insert(&created.key_pair_id, expected.tags.clone());
        expected.id = Some(created.key_pair_id);
        return Ok(());
    }

    if expected.shared {
        return Ok(());
    }
    let id = expected
        .id
        .as_deref()
        .ok_or_else(|| TaskError::Other(format!("SSH key {:?} has no ID", expected.name)))?;
    cloud.add_tags(ctx, id, &expected.tags)
}

#[derive(Serialize)]
struct TerraformSshKey<'a> {
    key_name: &'a str,
    public_key: Literal,
    tags: &'a Tags,
}

fn render_terraform(
    _ctx: &Context,
    target: &TerraformTarget,
    _actual: Option<&SshKey>,
    expected: &mut SshKey,
    _changes: &SshKeyChanges,
) -> Result<(), TaskError> {
    let Some(public_key) = &expected.public_key else {
        return Ok(());
    };
    let tf_name = expected.terraform_name();
    let public_key =
        target.add_file_resource("aws_key_pair", &tf_name, "public_key", public_key.as_bytes());

    target.render_resource(
        "aws_key_pair",
        &tf_name,
        &TerraformSshKey {
            key_name: &expected.name,
            public_key,
            tags: &expected.tags,
        },
    )
}
