// crates/scriptpad-server/src/build/project.rs
// Materializes a build directory: csproj, assembled program, generated
// sources, and reference items

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::process;
use scriptpad_types::{DotNetFrameworkVersion, Reference};

/// One on-disk project directory the toolchain can build
#[derive(Debug)]
pub struct DotNetProject {
    root: PathBuf,
    assembly_name: String,
    framework: DotNetFrameworkVersion,
}

impl DotNetProject {
    pub fn new(
        root: impl Into<PathBuf>,
        assembly_name: impl Into<String>,
        framework: DotNetFrameworkVersion,
    ) -> Self {
        Self {
            root: root.into(),
            assembly_name: assembly_name.into(),
            framework,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn program_file_path(&self) -> PathBuf {
        self.root.join("Program.cs")
    }

    /// Path of the built binary for a given configuration
    pub fn output_binary_path(&self, configuration: &str) -> PathBuf {
        self.root
            .join("bin")
            .join(configuration)
            .join(self.framework.tfm())
            .join(format!("{}.dll", self.assembly_name))
    }

    /// Create the project directory and write the project file. In-memory
    /// assembly images are dropped next to the project and referenced by path.
    pub async fn create(&self, references: &[Reference]) -> Result<()> {
        process::ensure_dir(&self.root).await?;

        let mut resolved: Vec<ResolvedReference> = Vec::with_capacity(references.len());
        for reference in references {
            match reference {
                Reference::AssemblyImage {
                    assembly_name,
                    image,
                } => {
                    let lib_dir = self.root.join("refs");
                    process::ensure_dir(&lib_dir).await?;
                    let dll_path = lib_dir.join(format!("{assembly_name}.dll"));
                    tokio::fs::write(&dll_path, image).await?;
                    resolved.push(ResolvedReference::Assembly {
                        name: assembly_name.clone(),
                        path: dll_path.display().to_string(),
                    });
                }
                Reference::Assembly { path } => {
                    let name = Path::new(path)
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("Library")
                        .to_string();
                    resolved.push(ResolvedReference::Assembly {
                        name,
                        path: path.clone(),
                    });
                }
                Reference::Package {
                    package_id,
                    version,
                } => {
                    resolved.push(ResolvedReference::Package {
                        id: package_id.clone(),
                        version: version.clone(),
                    });
                }
            }
        }

        let csproj = self.csproj_text(&resolved);
        let csproj_path = self.root.join(format!("{}.csproj", self.assembly_name));
        tokio::fs::write(&csproj_path, csproj).await?;

        debug!(project = %csproj_path.display(), "Materialized project");
        Ok(())
    }

    pub async fn write_program(&self, text: &str) -> Result<()> {
        tokio::fs::write(self.program_file_path(), text).await?;
        Ok(())
    }

    /// Add a generated source file alongside the program
    pub async fn add_source(&self, file_name: &str, contents: &str) -> Result<()> {
        tokio::fs::write(self.root.join(file_name), contents).await?;
        Ok(())
    }

    fn csproj_text(&self, references: &[ResolvedReference]) -> String {
        let mut xml = String::new();
        xml.push_str("<Project Sdk=\"Microsoft.NET.Sdk\">\n");
        xml.push_str("  <PropertyGroup>\n");
        xml.push_str("    <OutputType>Exe</OutputType>\n");
        xml.push_str(&format!(
            "    <TargetFramework>{}</TargetFramework>\n",
            self.framework.tfm()
        ));
        xml.push_str(&format!(
            "    <AssemblyName>{}</AssemblyName>\n",
            escape_xml(&self.assembly_name)
        ));
        xml.push_str("    <Nullable>enable</Nullable>\n");
        xml.push_str("    <ImplicitUsings>disable</ImplicitUsings>\n");
        xml.push_str("    <AllowUnsafeBlocks>true</AllowUnsafeBlocks>\n");
        xml.push_str("  </PropertyGroup>\n");

        let packages: Vec<&ResolvedReference> = references
            .iter()
            .filter(|r| matches!(r, ResolvedReference::Package { .. }))
            .collect();
        if !packages.is_empty() {
            xml.push_str("  <ItemGroup>\n");
            for reference in packages {
                if let ResolvedReference::Package { id, version } = reference {
                    xml.push_str(&format!(
                        "    <PackageReference Include=\"{}\" Version=\"{}\" />\n",
                        escape_xml(id),
                        escape_xml(version)
                    ));
                }
            }
            xml.push_str("  </ItemGroup>\n");
        }

        let assemblies: Vec<&ResolvedReference> = references
            .iter()
            .filter(|r| matches!(r, ResolvedReference::Assembly { .. }))
            .collect();
        if !assemblies.is_empty() {
            xml.push_str("  <ItemGroup>\n");
            for reference in assemblies {
                if let ResolvedReference::Assembly { name, path } = reference {
                    xml.push_str(&format!(
                        "    <Reference Include=\"{}\">\n      <HintPath>{}</HintPath>\n    </Reference>\n",
                        escape_xml(name),
                        escape_xml(path)
                    ));
                }
            }
            xml.push_str("  </ItemGroup>\n");
        }

        xml.push_str("</Project>\n");
        xml
    }
}

enum ResolvedReference {
    Assembly { name: String, path: String },
    Package { id: String, version: String },
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
