// リング全体で共有する定数群

// ID空間のビット数 m のデフォルト値. 2^m 個のIDを持つリングとなる
pub const DEFAULT_ID_SPACE_BITS : u32 = 6;
// u32 で表現するため 32 が上限. 1 だと finger_table[0] が最後のエントリと
// 重なり successor が壊れるので 2 以上とする
pub const MIN_ID_SPACE_BITS : u32 = 2;
pub const MAX_ID_SPACE_BITS : u32 = 32;

// find_predecessor のループの回せる回数の上限
pub const FIND_PREDECESSOR_MAX_HOPS : usize = 10;

// supernode が受け入れる確定済みノード数の上限
pub const DEFAULT_MAX_NODES : usize = 10;

// put_data/get_model を他ノードへ転送してよい回数
pub const DEFAULT_FORWARD_TTL : u32 = 3;

pub const DEFAULT_SUPERNODE_PORT : u16 = 9091;
pub const DEFAULT_NODE_HOST : &str = "127.0.0.1";
pub const DEFAULT_ADDRESS_TABLE_FILE : &str = "compute_node.txt";

// 0 を指定するとタイムアウト無しになる
pub const DEFAULT_RPC_TIMEOUT_SECS : u64 = 10;

// 学習処理のパラメータ
pub const DEFAULT_CLASS_NUM : usize = 26;
pub const DEFAULT_HIDDEN_UNITS : usize = 20;
pub const DEFAULT_LEARNING_RATE : f64 = 0.0001;
pub const DEFAULT_EPOCHS : usize = 250;
pub const DEFAULT_DATA_DIR : &str = "letters";

// クライアントのパラメータ
pub const DEFAULT_CLIENT_FILE_NUM : usize = 20;
pub const DEFAULT_POLL_MAX_ATTEMPTS : usize = 10;
pub const DEFAULT_POLL_INTERVAL_SECS : u64 = 5;
pub const DEFAULT_VALIDATION_FILE : &str = "validate_letters.txt";
pub const DEFAULT_V_SCALE : f64 = 0.1;
