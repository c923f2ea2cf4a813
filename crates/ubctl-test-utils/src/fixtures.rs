//! Canned daemon output and zone-file text.

/// `status` output as printed by a running daemon.
pub const STATUS_OUTPUT: &str = "version: 1.19.3
verbosity: 1
threads: 4
modules: 2 [ validator iterator ]
uptime: 90065 seconds
options: reuseport control(ssl)
unbound (pid 1234) is running...";

/// A slice of `stats_noreset` output.
pub const STATS_OUTPUT: &str = "thread0.num.queries=21
total.num.queries=42
total.num.queries_ip_ratelimited=3
total.num.cachehits=30
total.num.cachemiss=12
total.num.prefetch=5
total.num.zero_ttl=1
total.num.recursivereplies=12
total.requestlist.avg=0.5
total.requestlist.max=7
total.requestlist.overwritten=0
total.requestlist.exceeded=0
total.requestlist.current.all=2
total.requestlist.current.user=1
total.recursion.time.avg=0.012500
total.recursion.time.median=0.008
total.tcpusage=0
time.now=1700000000.123456";

/// A small primary zone with directives, comments, and a TTL-less record.
/// Every rdata is a single token, which is what the positional parser keeps.
pub const EXAMPLE_ZONE: &str = "$ORIGIN example.com.
$TTL 3600
@ IN NS ns1.example.com.
; primary nameserver
@ 3600 IN SOA ns1.example.com.
; web frontend
www 300 IN A 192.0.2.10
mail IN A 192.0.2.25
";
