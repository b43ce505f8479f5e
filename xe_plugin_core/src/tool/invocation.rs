use std::path::PathBuf;

/// Arguments for one dependency tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub command: String,
    pub with_dependencies: bool,
    pub working_dir: PathBuf,
    pub packages: Vec<String>,
}

impl ToolInvocation {
    /// `update --with-dependencies --working-dir=<root> [packages...]`
    pub fn update<I, S>(working_dir: PathBuf, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: "update".to_string(),
            with_dependencies: true,
            working_dir,
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.command.clone()];
        if self.with_dependencies {
            args.push("--with-dependencies".to_string());
        }
        args.push(format!("--working-dir={}", self.working_dir.display()));
        args.extend(self.packages.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_args() {
        let invocation = ToolInvocation::update(
            PathBuf::from("/srv/xe"),
            ["xpressengine-plugin/board", "xpressengine-plugin/page"],
        );
        assert_eq!(
            invocation.args(),
            vec![
                "update",
                "--with-dependencies",
                "--working-dir=/srv/xe",
                "xpressengine-plugin/board",
                "xpressengine-plugin/page",
            ]
        );
    }
}
