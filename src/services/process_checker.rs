use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};

/// 检查 PID 对应的进程是否仍然存在（僵尸进程视为已退出）
pub fn is_pid_alive(pid: u32) -> bool {
    let mut sys = System::new();
    let sys_pid = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    sys.process(sys_pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}

/// 判断进程的可执行文件与参数是否与描述符一致
///
/// 期望参数必须按顺序出现在实际参数的开头（允许实际参数包含路径前缀差异）。
fn is_cmd_match(process: &sysinfo::Process, bin_path: &str, expected_args: &[String]) -> bool {
    let exe_matches = match process.exe() {
        Some(exe) => exe.to_string_lossy().contains(bin_path.trim_start_matches("./")),
        None => false,
    };
    if !exe_matches {
        return false;
    }

    let actual = process.cmd();
    if actual.is_empty() {
        return false;
    }
    let actual_args = &actual[1..];
    if expected_args.len() > actual_args.len() {
        return false;
    }

    expected_args.iter().zip(actual_args).all(|(expected, actual)| {
        let actual = actual.to_string_lossy().replace("\\\\", "\\");
        let expected = expected.replace("\\\\", "\\");
        actual == expected || actual.contains(&expected)
    })
}

/// 查找与描述符匹配的已运行进程（优先返回主进程）
///
/// 策略优先级：
/// 1. PPID = 1 的进程（被 init 收养的孤儿进程）
/// 2. PPID 不在匹配列表中的进程（父进程，非子进程）
/// 3. 最小 PID（通常是最早创建的进程）
pub fn find_matching_pid(bin_path: &str, args: &[String]) -> Option<u32> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let own_pid = std::process::id();
    let matching: Vec<(u32, Option<u32>)> = sys
        .processes()
        .iter()
        .filter(|(pid, _)| pid.as_u32() != own_pid)
        .filter(|(_, process)| is_cmd_match(process, bin_path, args))
        .map(|(pid, process)| (pid.as_u32(), process.parent().map(|p| p.as_u32())))
        .collect();

    select_main_pid(&matching)
}

fn select_main_pid(matching: &[(u32, Option<u32>)]) -> Option<u32> {
    match matching {
        [] => return None,
        [(pid, _)] => return Some(*pid),
        _ => {}
    }

    if let Some((pid, _)) = matching.iter().find(|(_, ppid)| *ppid == Some(1)) {
        log::debug!("Found main process (PPID=1): PID {}", pid);
        return Some(*pid);
    }

    let pids: Vec<u32> = matching.iter().map(|(pid, _)| *pid).collect();
    if let Some((pid, ppid)) = matching
        .iter()
        .find(|(_, ppid)| ppid.is_some_and(|p| !pids.contains(&p)))
    {
        log::debug!("Found main process (parent not in group): PID {} (PPID={:?})", pid, ppid);
        return Some(*pid);
    }

    pids.into_iter().min()
}

/// 先发送 SIGTERM，在宽限期内等待退出，超时后强制结束
///
/// 返回进程最终是否已退出。
pub async fn terminate_pid(pid: u32, grace: Duration) -> bool {
    let sys_pid = Pid::from_u32(pid);
    {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        let Some(process) = sys.process(sys_pid) else {
            return true;
        };
        if process.kill_with(Signal::Term).is_none() {
            // 平台不支持 SIGTERM（Windows），直接结束
            process.kill();
        }
    }

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !is_pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    match sys.process(sys_pid) {
        Some(process) => {
            log::warn!("Process {} ignored SIGTERM, killing", pid);
            process.kill();
            tokio::time::sleep(Duration::from_millis(100)).await;
            !is_pid_alive(pid)
        }
        None => true,
    }
}
