use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// 外部命令的输出
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl CommandError {
    /// lsof 以退出码 1 表示没有匹配的进程
    pub fn is_no_match(&self) -> bool {
        matches!(self, CommandError::Failed { code: Some(1), .. })
    }

    /// 非零退出时仍然产生的标准输出
    pub fn partial_stdout(&self) -> Option<&str> {
        match self {
            CommandError::Failed { stdout, .. } if !stdout.is_empty() => Some(stdout),
            _ => None,
        }
    }
}

/// 在超时限制下运行外部命令，超时后子进程会被杀掉
pub async fn run(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(CommandError::Spawn { program: program.to_string(), source });
        }
        Err(_) => {
            return Err(CommandError::Timeout { program: program.to_string(), after: timeout });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(CommandError::Failed {
            program: program.to_string(),
            code: output.status.code(),
            stdout,
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

/// 外部命令执行的接缝，扫描器通过它调用 lsof / docker
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;
}

/// 真实的子进程执行
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
        run(program, args, timeout).await
    }
}

/// 以闭包返回预设结果的执行器
#[cfg(test)]
pub struct FnRunner<F>(pub F);

#[cfg(test)]
impl<F> CommandRunner for FnRunner<F>
where
    F: Fn(&str, &[&str]) -> Result<CommandOutput, CommandError> + Send + Sync,
{
    async fn run(&self, program: &str, args: &[&str], _timeout: Duration) -> Result<CommandOutput, CommandError> {
        (self.0)(program, args)
    }
}

#[cfg(test)]
pub fn stdout(text: &str) -> Result<CommandOutput, CommandError> {
    Ok(CommandOutput { stdout: text.to_string(), stderr: String::new() })
}

#[cfg(test)]
pub fn exit_code(program: &str, code: i32) -> Result<CommandOutput, CommandError> {
    Err(CommandError::Failed {
        program: program.to_string(),
        code: Some(code),
        stdout: String::new(),
        stderr: String::new(),
    })
}

/// 统一的尽力而为封装：失败时记录日志并返回默认值
pub async fn run_or_default<T, F>(
    what: &str,
    program: &str,
    args: &[&str],
    timeout: Duration,
    parse: F,
) -> T
where
    T: Default,
    F: FnOnce(&str) -> T,
{
    run_or_default_with(&SystemRunner, what, program, args, timeout, parse).await
}

pub async fn run_or_default_with<R, T, F>(
    runner: &R,
    what: &str,
    program: &str,
    args: &[&str],
    timeout: Duration,
    parse: F,
) -> T
where
    R: CommandRunner,
    T: Default,
    F: FnOnce(&str) -> T,
{
    match runner.run(program, args, timeout).await {
        Ok(output) => parse(&output.stdout),
        Err(e) => {
            log::debug!("[{}] {}", what, e);
            T::default()
        }
    }
}
